//! Shared status handling for the address-backed kinds
//! (Memory, MCPServer, A2AServer, ExecutionEngine, Evaluator).

use keel_core::{
    set_condition, ClusterClient, Condition, ConditionStatus, KeelError, KeelResult, Resource,
    ResourcePhase,
};
use keel_core::resources::AddressableStatus;

use crate::status::update_status_with_retry;

/// Write phase, condition, and lastResolvedAddress from a resolution (or
/// probe) outcome. Unchanged status produces no write.
pub(crate) async fn write_address_status<R>(
    cluster: &ClusterClient,
    namespace: &str,
    name: &str,
    generation: i64,
    condition_type: &'static str,
    outcome: &Result<String, KeelError>,
    status_of: fn(&mut R) -> &mut Option<AddressableStatus>,
) -> KeelResult<()>
where
    R: Resource,
{
    let (phase, condition, address, message) = match outcome {
        Ok(address) => (
            ResourcePhase::Ready,
            Condition::new(condition_type, ConditionStatus::True, "Resolved", ""),
            Some(address.clone()),
            None,
        ),
        Err(e) => (
            ResourcePhase::Error,
            Condition::new(
                condition_type,
                ConditionStatus::False,
                "ResolutionFailed",
                e.to_string(),
            ),
            None,
            Some(e.to_string()),
        ),
    };

    update_status_with_retry(cluster, namespace, name, move |object: &mut R| {
        let slot = status_of(object);
        let mut status = slot.clone().unwrap_or_default();
        let before = serde_json::to_value(&status).unwrap_or_default();

        status.phase = phase;
        status.message = message.clone();
        if address.is_some() {
            status.last_resolved_address = address.clone();
        }
        set_condition(&mut status.conditions, condition.clone(), generation);

        let after = serde_json::to_value(&status).unwrap_or_default();
        *slot = Some(status);
        before != after
    })
    .await?;
    Ok(())
}

/// Seed Unknown/Initializing conditions on first sight; returns whether a
/// seed write happened.
pub(crate) async fn seed_conditions<R>(
    cluster: &ClusterClient,
    namespace: &str,
    name: &str,
    generation: i64,
    condition_type: &'static str,
    status_of: fn(&mut R) -> &mut Option<AddressableStatus>,
    empty: bool,
) -> KeelResult<bool>
where
    R: Resource,
{
    if !empty {
        return Ok(false);
    }
    update_status_with_retry(cluster, namespace, name, move |object: &mut R| {
        let slot = status_of(object);
        let mut status = slot.clone().unwrap_or_default();
        status.phase = ResourcePhase::Pending;
        set_condition(
            &mut status.conditions,
            Condition::new(condition_type, ConditionStatus::Unknown, "Initializing", ""),
            generation,
        );
        *slot = Some(status);
        true
    })
    .await?;
    Ok(true)
}
