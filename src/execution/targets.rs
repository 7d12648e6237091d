//! Candidate host selection, maintenance filtering and target policies.

use std::collections::BTreeSet;

use anyhow::Result;
use tracing::debug;

use super::command::TargetHostType;
use crate::cluster::ClusterStore;
use crate::error::UpgradeError;
use crate::model::ClusterId;

/// What the selection is for; only used to describe failures.
#[derive(Debug, Clone, Copy)]
pub struct SelectionScope<'a> {
    pub cluster: &'a str,
    pub service: Option<&'a str>,
    pub component: Option<&'a str>,
    pub action: &'a str,
}

/// Hosts able to run an action scoped to `service`/`component`.
///
/// Neither given: every cluster host. Service only: union of the hosts of all
/// its components. Both: that component's hosts.
pub fn select_candidates(
    store: &dyn ClusterStore,
    cluster: ClusterId,
    service: Option<&str>,
    component: Option<&str>,
) -> Result<BTreeSet<String>> {
    match (service, component) {
        (Some(service), Some(component)) => store.component_hosts(cluster, service, component),
        (Some(service), None) => {
            let mut hosts = BTreeSet::new();
            for component in store.components(cluster, service)? {
                hosts.extend(store.component_hosts(cluster, service, &component)?);
            }
            Ok(hosts)
        }
        (None, _) => store.hosts(cluster),
    }
}

/// Split `candidates` into (kept, removed) using the `is_disallowed` predicate.
pub fn filter_maintenance<F>(
    candidates: BTreeSet<String>,
    mut is_disallowed: F,
) -> Result<(BTreeSet<String>, BTreeSet<String>)>
where
    F: FnMut(&str) -> Result<bool>,
{
    let mut kept = BTreeSet::new();
    let mut removed = BTreeSet::new();
    for host in candidates {
        if is_disallowed(&host)? {
            removed.insert(host);
        } else {
            kept.insert(host);
        }
    }
    if !removed.is_empty() {
        debug!("Ignoring action for hosts in maintenance mode: {:?}", removed);
    }
    Ok((kept, removed))
}

/// Resolve the final host list for one resource filter.
///
/// Explicit hosts win but must belong to a non-empty candidate set; otherwise
/// `target_type` chooses among the candidates, `pick` selecting one healthy host.
pub fn select_targets<F>(
    scope: SelectionScope<'_>,
    target_type: TargetHostType,
    requested: &[String],
    mut candidates: BTreeSet<String>,
    mut pick: F,
) -> Result<Vec<String>>
where
    F: FnMut(&BTreeSet<String>) -> Result<Option<String>>,
{
    if requested.is_empty() && candidates.is_empty() {
        return Err(UpgradeError::NoSuitableHosts {
            cluster: scope.cluster.to_string(),
            service: scope.service.unwrap_or_default().to_string(),
            component: scope.component.unwrap_or_default().to_string(),
            action: scope.action.to_string(),
        }
        .into());
    }

    if !requested.is_empty() {
        if !candidates.is_empty()
            && let Some(host) = requested.iter().find(|h| !candidates.contains(*h))
        {
            return Err(UpgradeError::HostNotCandidate {
                host: host.clone(),
                service: scope.service.unwrap_or_default().to_string(),
                component: scope.component.unwrap_or_default().to_string(),
            }
            .into());
        }
        let mut seen = BTreeSet::new();
        return Ok(requested
            .iter()
            .filter(|h| seen.insert(h.as_str()))
            .cloned()
            .collect());
    }

    match target_type {
        TargetHostType::All => Ok(candidates.into_iter().collect()),
        TargetHostType::Any => Ok(pick(&candidates)?.into_iter().collect()),
        TargetHostType::Majority => {
            let wanted = candidates.len() / 2 + 1;
            let mut chosen = Vec::with_capacity(wanted);
            for _ in 0..wanted {
                let Some(host) = pick(&candidates)? else {
                    break;
                };
                candidates.remove(&host);
                chosen.push(host);
            }
            Ok(chosen)
        }
        TargetHostType::Specific => {
            Err(UpgradeError::UnsupportedTargetType(target_type.to_string()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn scope() -> SelectionScope<'static> {
        SelectionScope {
            cluster: "c1",
            service: Some("HDFS"),
            component: Some("DATANODE"),
            action: "ru_execute_tasks",
        }
    }

    fn first(c: &BTreeSet<String>) -> Result<Option<String>> {
        Ok(c.first().cloned())
    }

    #[test]
    fn test_select_all() {
        let targets =
            select_targets(scope(), TargetHostType::All, &[], hosts(&["h1", "h2"]), first)
                .unwrap();
        assert_eq!(targets, vec!["h1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn test_select_any_picks_one() {
        let targets =
            select_targets(scope(), TargetHostType::Any, &[], hosts(&["h1", "h2", "h3"]), first)
                .unwrap();
        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_select_majority_distinct() {
        for n in 1..=7 {
            let names: Vec<String> = (0..n).map(|i| format!("h{i}")).collect();
            let candidates: BTreeSet<String> = names.iter().cloned().collect();
            let targets =
                select_targets(scope(), TargetHostType::Majority, &[], candidates, first).unwrap();
            assert_eq!(targets.len(), n / 2 + 1, "n = {n}");
            let unique: BTreeSet<&String> = targets.iter().collect();
            assert_eq!(unique.len(), targets.len());
        }
    }

    #[test]
    fn test_no_suitable_hosts() {
        let err = select_targets(scope(), TargetHostType::All, &[], BTreeSet::new(), first)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::NoSuitableHosts { .. })
        ));
    }

    #[test]
    fn test_explicit_host_not_candidate() {
        let requested = vec!["h1".to_string(), "h9".to_string()];
        let err = select_targets(
            scope(),
            TargetHostType::All,
            &requested,
            hosts(&["h1", "h2"]),
            first,
        )
        .unwrap_err();
        match err.downcast_ref::<UpgradeError>() {
            Some(UpgradeError::HostNotCandidate { host, .. }) => assert_eq!(host, "h9"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_hosts_used_verbatim() {
        let requested = vec!["h2".to_string(), "h2".to_string(), "h1".to_string()];
        let targets = select_targets(
            scope(),
            TargetHostType::Majority,
            &requested,
            hosts(&["h1", "h2", "h3"]),
            first,
        )
        .unwrap();
        assert_eq!(targets, vec!["h2".to_string(), "h1".to_string()]);
    }

    #[test]
    fn test_specific_without_hosts_is_unsupported() {
        let err = select_targets(scope(), TargetHostType::Specific, &[], hosts(&["h1"]), first)
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported target type = SPECIFIC");
    }

    #[test]
    fn test_filter_maintenance() {
        let (kept, removed) =
            filter_maintenance(hosts(&["h1", "h2", "h3"]), |h| Ok(h == "h2")).unwrap();
        assert_eq!(kept, hosts(&["h1", "h3"]));
        assert_eq!(removed, hosts(&["h2"]));
    }
}
