//! Property-based tests for contract handling and place arguments.

use proptest::prelude::*;

use layered_attest_core::{
    Collaborators, Credentials, KeyValue, MeasurementCallbacks, MeasurementDispatcher, PlaceArgs, Scenario,
    DOMAIN_ZERO_PLACE, TARGET_PLACE,
};
use layered_attest_graph::{BlobData, MeasurementGraph};

use crate::support::{
    blob, places, registry, remote_variable, CountingRunner, MockChannel, MockUserspace,
    MockVerifier,
};

fn contract_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..512)
}

/// Strategy for place keys, including ones the APB ignores.
fn place_key() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(DOMAIN_ZERO_PLACE.to_string()),
        Just(TARGET_PLACE.to_string()),
        "@_[a-z0-9]{1,3}",
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    /// The scenario's contract survives a remote measurement whatever the
    /// peer sent back and whether or not it verified.
    #[test]
    fn contract_restored_after_remote_measurement(
        original in contract_bytes(),
        received in prop::collection::vec(any::<u8>(), 1..512),
        verified in any::<bool>(),
    ) {
        let runner = CountingRunner::new(0);
        let channel = MockChannel::returning(received.clone());
        let verifier = if verified {
            MockVerifier::returning(received.iter().rev().copied().collect())
        } else {
            MockVerifier::failing()
        };
        let userspace = MockUserspace::default();
        let collaborators = Collaborators {
            runner: &runner,
            channel: &channel,
            verifier: &verifier,
            userspace: &userspace,
        };
        let graph = MeasurementGraph::create(None).unwrap();
        let registry = registry();
        let places = places();
        let mut scenario = Scenario { contract: original.clone(), ..Scenario::default() };
        let credentials = Credentials::stage(&scenario);
        let variable = remote_variable(TARGET_PLACE, "app-list");

        let result = MeasurementDispatcher::new(
            &registry,
            &places,
            &credentials,
            &mut scenario,
            collaborators,
        )
        .measure_variable(&graph, &variable, &blob());

        prop_assert_eq!(result.is_ok(), verified);
        prop_assert_eq!(&scenario.contract, &original);
        prop_assert_eq!(verifier.seen.borrow().clone(), vec![received.clone()]);

        let node = graph.find_node(&variable).unwrap().unwrap();
        prop_assert_eq!(graph.has_data(node, &blob()), verified);
        if verified {
            let stored: BlobData =
                graph.get_data(node, &blob()).unwrap().unwrap().unmarshal().unwrap();
            prop_assert_eq!(stored.buffer, received.iter().rev().copied().collect::<Vec<u8>>());
        }
    }

    /// Parsing succeeds exactly when both places appear, and the first
    /// occurrence of each wins.
    #[test]
    fn place_args_first_occurrence_wins(
        pairs in prop::collection::vec((place_key(), "[a-z]{1,8}"), 2..8),
    ) {
        let args: Vec<KeyValue> =
            pairs.iter().map(|(k, v)| KeyValue::new(k.as_str(), v.as_str())).collect();
        let first = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone());

        match (PlaceArgs::parse(&args), first(DOMAIN_ZERO_PLACE), first(TARGET_PLACE)) {
            (Ok(parsed), Some(domain_zero), Some(target)) => {
                prop_assert_eq!(parsed.domain_zero, domain_zero);
                prop_assert_eq!(parsed.target, target);
            },
            (Err(_), None, _) | (Err(_), _, None) => {},
            (result, domain_zero, target) => {
                prop_assert!(false, "parse {:?} with @_0={:?} @_t={:?}", result, domain_zero, target);
            },
        }
    }
}

#[test]
fn test_key_value_from_str() {
    let kv: KeyValue = "@_0=dom0".parse().unwrap();
    assert_eq!(kv, KeyValue::new("@_0", "dom0"));
    assert!("no-separator".parse::<KeyValue>().is_err());
}
