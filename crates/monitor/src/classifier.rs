//! Line classifier for node output
//!
//! Each line is matched against a fixed, ordered rule table. The first rule
//! whose pattern matches and whose captures parse wins; a rule whose numeric
//! capture does not parse is skipped as if it had not matched. Lines that
//! match no rule produce no event.
//!
//! Recognized shapes, in priority order:
//! - `[Node 0] Generation 10: 423 live cells in partition`
//! - `[Node 0] Page faults: 124 (R: 100, W: 24)`
//! - `[Node 0] Network: 45.20 KB sent, 38.10 KB received`
//! - `[Node 0] Passed BARRIER_COMPUTE_0`
//! - `[Node 0] Partition: rows [0, 50)`
//! - `[Node 0] === Computation Complete ===`
//! - `[Node 0] Final live cells: 1234`

use std::str::FromStr;
use std::sync::OnceLock;

use events::{BarrierAction, Event, EventPayload, NodeId};
use regex::{Captures, Regex};

type Builder = fn(&Captures<'_>) -> Option<EventPayload>;

/// One entry of the rule table. Group 1 of every pattern is the node id.
struct Rule {
    name: &'static str,
    pattern: Regex,
    build: Builder,
}

impl Rule {
    fn new(name: &'static str, pattern: &str, build: Builder) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).expect("Invalid classifier regex pattern"),
            build,
        }
    }

    fn apply(&self, line: &str) -> Option<Event> {
        let caps = self.pattern.captures(line)?;
        let node: NodeId = group(&caps, 1)?;
        let payload = (self.build)(&caps)?;
        Some(Event::new(node, payload))
    }
}

/// Parse a capture group, treating a parse failure as no match
fn group<T: FromStr>(caps: &Captures<'_>, index: usize) -> Option<T> {
    caps.get(index)?.as_str().parse().ok()
}

/// Ordered pattern table turning output lines into events
pub struct LineClassifier {
    rules: Vec<Rule>,
}

impl LineClassifier {
    pub fn new() -> Self {
        let rules = vec![
            Rule::new(
                "generation",
                r"\[Node (\d+)\] Generation (\d+): (\d+) live cells",
                |caps| {
                    Some(EventPayload::Generation {
                        generation: group(caps, 2)?,
                        live_cells: group(caps, 3)?,
                    })
                },
            ),
            Rule::new(
                "page_faults",
                r"\[Node (\d+)\] Page faults: (\d+) \(R: (\d+), W: (\d+)\)",
                |caps| {
                    Some(EventPayload::PageFaults {
                        total: group(caps, 2)?,
                        read: group(caps, 3)?,
                        write: group(caps, 4)?,
                    })
                },
            ),
            Rule::new(
                "network",
                r"\[Node (\d+)\] Network: ([\d.]+) KB sent, ([\d.]+) KB received",
                |caps| {
                    Some(EventPayload::Network {
                        kb_sent: group(caps, 2)?,
                        kb_received: group(caps, 3)?,
                    })
                },
            ),
            Rule::new(
                "barrier_pass",
                r"\[Node (\d+)\] Passed (BARRIER_\w+)",
                |caps| {
                    Some(EventPayload::Barrier {
                        name: caps.get(2)?.as_str().to_string(),
                        action: BarrierAction::Passed,
                    })
                },
            ),
            Rule::new(
                "partition",
                r"\[Node (\d+)\] Partition: rows \[(\d+), (\d+)\)",
                |caps| {
                    Some(EventPayload::Init {
                        start_row: group(caps, 2)?,
                        end_row: group(caps, 3)?,
                    })
                },
            ),
            Rule::new(
                "complete",
                r"\[Node (\d+)\] === Computation Complete ===",
                |_| {
                    Some(EventPayload::Complete {
                        final_live_cells: None,
                    })
                },
            ),
            Rule::new(
                "final_cells",
                r"\[Node (\d+)\] Final live cells: (\d+)",
                |caps| {
                    Some(EventPayload::Complete {
                        final_live_cells: Some(group(caps, 2)?),
                    })
                },
            ),
        ];

        Self { rules }
    }

    /// Classify one line of output
    pub fn classify(&self, line: &str) -> Option<Event> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        self.rules.iter().find_map(|rule| rule.apply(line))
    }

    /// Names of the rules in the order they are tried
    pub fn rule_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.name)
    }
}

impl Default for LineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a line with the shared classifier
pub fn classify(line: &str) -> Option<Event> {
    static CLASSIFIER: OnceLock<LineClassifier> = OnceLock::new();
    CLASSIFIER.get_or_init(LineClassifier::new).classify(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(line: &str) -> Option<(NodeId, EventPayload)> {
        classify(line).map(|event| (event.node(), event.payload().clone()))
    }

    #[test]
    fn test_generation_line() {
        assert_eq!(
            payload("[Node 0] Generation 10: 423 live cells in partition"),
            Some((
                0,
                EventPayload::Generation {
                    generation: 10,
                    live_cells: 423
                }
            ))
        );
    }

    #[test]
    fn test_page_faults_line() {
        assert_eq!(
            payload("[Node 1] Page faults: 124 (R: 100, W: 24)"),
            Some((
                1,
                EventPayload::PageFaults {
                    total: 124,
                    read: 100,
                    write: 24
                }
            ))
        );
    }

    #[test]
    fn test_network_line() {
        assert_eq!(
            payload("[Node 0] Network: 45.20 KB sent, 38.10 KB received"),
            Some((
                0,
                EventPayload::Network {
                    kb_sent: 45.20,
                    kb_received: 38.10
                }
            ))
        );
    }

    #[test]
    fn test_barrier_line() {
        assert_eq!(
            payload("[Node 3] Passed BARRIER_COMPUTE_0"),
            Some((
                3,
                EventPayload::Barrier {
                    name: "BARRIER_COMPUTE_0".to_string(),
                    action: BarrierAction::Passed
                }
            ))
        );
    }

    #[test]
    fn test_partition_line() {
        assert_eq!(
            payload("[Node 1] Partition: rows [50, 100)"),
            Some((
                1,
                EventPayload::Init {
                    start_row: 50,
                    end_row: 100
                }
            ))
        );
    }

    #[test]
    fn test_completion_lines() {
        assert_eq!(
            payload("[Node 0] === Computation Complete ==="),
            Some((
                0,
                EventPayload::Complete {
                    final_live_cells: None
                }
            ))
        );
        assert_eq!(
            payload("[Node 2] Final live cells: 1234"),
            Some((
                2,
                EventPayload::Complete {
                    final_live_cells: Some(1234)
                }
            ))
        );
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let event = classify("   [Node 0] Generation 2: 9 live cells\r\n").unwrap();
        assert_eq!(event.kind(), events::EventKind::Generation);
    }

    #[test]
    fn test_unrecognized_lines() {
        assert!(classify("").is_none());
        assert!(classify("   \t  ").is_none());
        assert!(classify("Starting Game of Life with 2 nodes").is_none());
        assert!(classify("[Node 0] Waiting at BARRIER_COMPUTE_0...").is_none());
        assert!(classify("[Node 0] DSM initialized successfully").is_none());
        assert!(classify("[Node x] Generation 1: 2 live cells").is_none());
    }

    #[test]
    fn test_malformed_capture_is_not_a_match() {
        assert!(classify("[Node 0] Network: 1.2.3 KB sent, 4.0 KB received").is_none());
        assert!(
            classify("[Node 99999999999999999999] Generation 1: 2 live cells").is_none()
        );
    }

    #[test]
    fn test_malformed_capture_falls_through_to_later_rule() {
        // The generation rule matches textually but its count overflows u64,
        // so the final-cells rule further down the table gets the line.
        let line = "[Node 0] Generation 99999999999999999999: 1 live cells, \
                    [Node 0] Final live cells: 7";
        assert_eq!(
            payload(line),
            Some((
                0,
                EventPayload::Complete {
                    final_live_cells: Some(7)
                }
            ))
        );
    }

    #[test]
    fn test_first_match_wins() {
        let line = "[Node 1] Generation 5: 8 live cells; [Node 1] Final live cells: 8";
        assert_eq!(
            payload(line),
            Some((
                1,
                EventPayload::Generation {
                    generation: 5,
                    live_cells: 8
                }
            ))
        );
    }

    #[test]
    fn test_rule_order() {
        let classifier = LineClassifier::new();
        let names: Vec<_> = classifier.rule_names().collect();
        assert_eq!(
            names,
            vec![
                "generation",
                "page_faults",
                "network",
                "barrier_pass",
                "partition",
                "complete",
                "final_cells"
            ]
        );
    }
}
