//! Short display names for lineage nodes.
//!
//! The store keeps fully qualified names; these helpers only shorten them for
//! rendering. A name that does not have the expected shape is returned as is.
use crate::metadata::names;

fn prefix4(s: &str) -> &str {
    match s.char_indices().nth(4) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Shortens an artifact name according to its type.
///
/// | type | stored | displayed |
/// |------|--------|-----------|
/// | `Dataset` | `artifacts/data.xml.gz:236d95...` | `data.xml.gz:236d` |
/// | `Model` | `artifacts/model/model.pkl:4c48f2...:9` | `model.pkl:4c48` |
/// | `Metrics` | `metrics:7bea36fc-...:13` | `metrics:7bea:13` |
/// | `Dataslice` | `cmf_artifacts/<uuid>/dataslice/slice-1:0591...` | `<uuid>/dataslice/slice-1:0591` |
/// | `Step_Metrics` | `cmf_artifacts/<uuid>/metrics/m:46fd...:15:744a...` | `<uuid>/metrics/m:46fd:15:744a` |
pub fn artifact_display_name(name: &str, type_name: &str) -> String {
    shorten_artifact_name(name, type_name).unwrap_or_else(|| name.to_owned())
}

fn shorten_artifact_name(name: &str, type_name: &str) -> Option<String> {
    let parts = name.split(':').collect::<Vec<_>>();
    let n = parts.len();
    match type_name {
        names::METRICS if n >= 3 => Some(format!(
            "{}:{}:{}",
            parts[0],
            prefix4(parts[1]),
            parts[2]
        )),
        names::MODEL if n >= 3 => Some(format!(
            "{}:{}",
            last_segment(parts[n - 3]),
            prefix4(parts[n - 2])
        )),
        names::DATASET if n >= 2 => Some(format!(
            "{}:{}",
            last_segment(parts[0]),
            prefix4(parts[n - 1])
        )),
        names::DATASLICE => {
            let (_, tail) = name.split_once('/')?;
            let tail_parts = tail.split(':').collect::<Vec<_>>();
            Some(format!(
                "{}:{}",
                tail_parts[0],
                prefix4(tail_parts[tail_parts.len() - 1])
            ))
        }
        names::STEP_METRICS if n >= 3 => {
            let (_, tail) = name.split_once('/')?;
            let head = tail.split(':').next()?;
            Some(format!(
                "{}:{}:{}:{}",
                head,
                prefix4(parts[n - 3]),
                parts[n - 2],
                prefix4(parts[n - 1])
            ))
        }
        _ => None,
    }
}

/// Shortens the first path segment and the artifact hash, as used in the force graph.
pub fn truncate_artifact_name(name: &str) -> String {
    let mut parts = last_segment(name).split(':').collect::<Vec<_>>();
    if parts.len() > 1 {
        parts[1] = prefix4(parts[1]);
    }
    parts.join(":")
}

/// `<step>_<uuid[:4]>` for an execution of `type_name` (optionally prefixed by
/// `<pipeline>/`) carrying `uuid`.
pub fn execution_display_name(type_name: &str, uuid: &str) -> String {
    let step = match type_name.split_once('/') {
        Some((_, step)) => step,
        None => type_name,
    };
    let uuid = uuid.split(',').next().unwrap_or(uuid).trim();
    let head = uuid.split('-').next().unwrap_or(uuid);
    format!("{}_{}", step, prefix4(head))
}
