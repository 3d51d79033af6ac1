//! Pod security context

use serde_json::Value;

use crate::context::PatchConfig;
use crate::view::{child, PodSpecMut};

/// Run every pod as the configured non-root user and group
pub fn apply(pod: &mut PodSpecMut<'_>, config: &PatchConfig) {
    let has_volumes = !pod.volumes().is_empty();
    let ctx = child(pod.fields(), "securityContext");
    ctx.insert("runAsUser".to_string(), Value::from(config.run_as_user));
    ctx.insert("runAsGroup".to_string(), Value::from(config.run_as_group));
    if has_volumes {
        ctx.insert("fsGroup".to_string(), Value::from(config.run_as_group));
        ctx.insert(
            "fsGroupChangePolicy".to_string(),
            Value::String("OnRootMismatch".to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overrides_user_supplied_identity() {
        let mut spec = json!({"securityContext": {"runAsUser": 0, "seccompProfile": {"type": "RuntimeDefault"}}, "containers": []});
        apply(&mut PodSpecMut::new(&mut spec), &PatchConfig::default());
        let sc = &spec["securityContext"];
        assert_eq!(sc["runAsUser"], 1000);
        assert_eq!(sc["runAsGroup"], 1000);
        assert_eq!(sc["seccompProfile"]["type"], "RuntimeDefault");
        assert!(sc.get("fsGroup").is_none());
    }

    #[test]
    fn volumes_get_fs_group() {
        let mut spec = json!({"volumes": [{"name": "data"}], "containers": []});
        let config = PatchConfig {
            run_as_user: 2000,
            run_as_group: 3000,
            ..Default::default()
        };
        apply(&mut PodSpecMut::new(&mut spec), &config);
        assert_eq!(spec["securityContext"]["runAsUser"], 2000);
        assert_eq!(spec["securityContext"]["fsGroup"], 3000);
        assert_eq!(spec["securityContext"]["fsGroupChangePolicy"], "OnRootMismatch");
    }
}
