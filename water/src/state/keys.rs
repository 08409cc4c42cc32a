//! Storage key layout
//!
//! Every write is an upsert keyed by run, phase and (optionally) target, so
//! concurrent writers touching different targets never collide.

/// Request snapshot, rewritten at each phase boundary
pub fn request(request_id: &str) -> String {
    format!("propagation:{}", request_id)
}

pub fn context(request_id: &str, target: &str) -> String {
    format!("propagation:{}:context:{}", request_id, target)
}

pub fn readiness(request_id: &str) -> String {
    format!("propagation:{}:readiness", request_id)
}

/// One reflection/revision iteration
pub fn revision(request_id: &str, phase: &str, scope: &str, iteration: u32) -> String {
    format!("propagation:{}:revision:{}:{}:{}", request_id, phase, scope, iteration)
}

pub fn result(request_id: &str) -> String {
    format!("propagation:{}:result", request_id)
}

/// Current guideline of a component
pub fn guideline(component: &str) -> String {
    format!("component:{}:guideline", component)
}

/// Busy flag of a component
pub fn busy(component: &str) -> String {
    format!("component:{}:busy", component)
}

/// Record of an update applied to a component
pub fn update(component: &str, update_id: &str) -> String {
    format!("component:{}:update:{}", component, update_id)
}
