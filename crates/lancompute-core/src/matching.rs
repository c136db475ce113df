//! Capability matching: does a node satisfy a task's requirements?

use std::collections::HashMap;

use crate::model::{CapabilityValue, Requirement};

/// A task with no requirements matches any node. Otherwise every
/// `(key, constraint)` pair must find a satisfying capability —
/// a missing key fails the match.
pub fn node_satisfies(
    capabilities: &HashMap<String, CapabilityValue>,
    requirements: &HashMap<String, Requirement>,
) -> bool {
    requirements
        .iter()
        .all(|(key, req)| match capabilities.get(key) {
            Some(value) => satisfies(req, value),
            None => false,
        })
}

fn satisfies(req: &Requirement, value: &CapabilityValue) -> bool {
    match (req, value) {
        (Requirement::NumericMinimum(min), CapabilityValue::Number(n)) => n >= min,
        (Requirement::ExactBool(want), CapabilityValue::Bool(have)) => want == have,
        (Requirement::ExactString(want), CapabilityValue::String(have)) => want == have,
        (Requirement::StringSet(set), CapabilityValue::String(have)) => {
            set.iter().any(|candidate| candidate == have)
        }
        // A constraint whose shape doesn't match the capability's
        // shape (e.g. a numeric-minimum requirement against a string
        // capability) can never be satisfied.
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(pairs: &[(&str, CapabilityValue)]) -> HashMap<String, CapabilityValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn reqs(pairs: &[(&str, Requirement)]) -> HashMap<String, Requirement> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn empty_requirements_match_any_node() {
        let capabilities = caps(&[]);
        let requirements = reqs(&[]);
        assert!(node_satisfies(&capabilities, &requirements));
    }

    #[test]
    fn numeric_minimum() {
        let capabilities = caps(&[("cpu_count", CapabilityValue::Number(8.0))]);
        assert!(node_satisfies(
            &capabilities,
            &reqs(&[("cpu_count", Requirement::NumericMinimum(4.0))])
        ));
        assert!(!node_satisfies(
            &capabilities,
            &reqs(&[("cpu_count", Requirement::NumericMinimum(16.0))])
        ));
    }

    #[test]
    fn exact_bool_and_missing_key() {
        let capabilities = caps(&[("gpu_available", CapabilityValue::Bool(false))]);
        assert!(node_satisfies(
            &capabilities,
            &reqs(&[("gpu_available", Requirement::ExactBool(false))])
        ));
        assert!(!node_satisfies(
            &capabilities,
            &reqs(&[("gpu_available", Requirement::ExactBool(true))])
        ));
        assert!(!node_satisfies(
            &capabilities,
            &reqs(&[("metal_support", Requirement::ExactBool(true))])
        ));
    }

    #[test]
    fn membership_in_set() {
        let capabilities = caps(&[("platform", CapabilityValue::String("linux".into()))]);
        assert!(node_satisfies(
            &capabilities,
            &reqs(&[(
                "platform",
                Requirement::StringSet(vec!["linux".into(), "macos".into()])
            )])
        ));
        assert!(!node_satisfies(
            &capabilities,
            &reqs(&[(
                "platform",
                Requirement::StringSet(vec!["windows".into()])
            )])
        ));
    }

    #[test]
    fn type_mismatch_never_matches() {
        let capabilities = caps(&[("platform", CapabilityValue::String("linux".into()))]);
        assert!(!node_satisfies(
            &capabilities,
            &reqs(&[("platform", Requirement::NumericMinimum(1.0))])
        ));
    }
}
