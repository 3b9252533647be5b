use agentwatch_sessions::{AdapterEvent, Outcome};

/// Judge a session from its `test_result` events alone.
///
/// A failing run plus a different run that passed anything is `Partial`,
/// whatever the counts or order. Otherwise any failure is `Failure`, any
/// clean pass is `Success`, and no decisive result is `Unknown`.
pub fn derive_outcome(events: &[AdapterEvent]) -> Outcome {
    let mut failing = Vec::new();
    let mut passing = Vec::new();

    let results = events.iter().filter_map(|e| match e {
        AdapterEvent::TestResult { passed, failed, .. } => Some((*passed, *failed)),
        _ => None,
    });
    for (index, (passed, failed)) in results.enumerate() {
        if failed > 0 {
            failing.push(index);
        }
        if passed > 0 {
            passing.push(index);
        }
    }

    let mixed = passing
        .iter()
        .any(|p| failing.iter().any(|f| f != p));

    if mixed {
        Outcome::Partial
    } else if !failing.is_empty() {
        Outcome::Failure
    } else if !passing.is_empty() {
        Outcome::Success
    } else {
        Outcome::Unknown
    }
}
