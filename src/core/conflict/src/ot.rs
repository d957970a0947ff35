use axon_core::{AxonError, AxonResult};
use serde::{Deserialize, Serialize};

/// Typed edit operations for operational transformation
///
/// Positions and lengths are in characters. `Move::to` addresses the
/// document as it stands after the moved range is removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    Insert { pos: usize, text: String },
    Delete { pos: usize, len: usize },
    Retain { len: usize },
    Replace { pos: usize, len: usize, text: String },
    Move { from: usize, len: usize, to: usize },
}

impl EditOp {
    fn char_len(text: &str) -> usize {
        text.chars().count()
    }
}

/// Transform `op` so it applies after `against` has been applied
///
/// `op_has_priority` breaks insert-position ties: the prioritized side
/// keeps its position, the other shifts right. Callers derive it from
/// agent-id ordering so every replica agrees. A delete fully swallowed by
/// a concurrent delete transforms away (empty result).
pub fn transform_op(op: &EditOp, against: &EditOp, op_has_priority: bool) -> Vec<EditOp> {
    match against {
        EditOp::Retain { .. } => vec![op.clone()],
        EditOp::Insert { pos, text } => transform_against_insert(op, *pos, EditOp::char_len(text), op_has_priority),
        EditOp::Delete { pos, len } => transform_against_delete(op, *pos, *len),
        EditOp::Replace { pos, len, text } => {
            // A replace is a delete followed by an insert at the same spot
            let after_delete = transform_against_delete(op, *pos, *len);
            after_delete
                .iter()
                .flat_map(|o| transform_against_insert(o, *pos, EditOp::char_len(text), op_has_priority))
                .collect()
        }
        EditOp::Move { from, len, to } => {
            // Removal then re-insertion of the same span
            let after_delete = transform_against_delete(op, *from, *len);
            after_delete
                .iter()
                .flat_map(|o| transform_against_insert(o, *to, *len, op_has_priority))
                .collect()
        }
    }
}

fn transform_against_insert(
    op: &EditOp,
    at: usize,
    ins_len: usize,
    op_has_priority: bool,
) -> Vec<EditOp> {
    match op {
        EditOp::Insert { pos, text } => {
            let shifted = if *pos > at || (*pos == at && !op_has_priority) {
                pos + ins_len
            } else {
                *pos
            };
            vec![EditOp::Insert {
                pos: shifted,
                text: text.clone(),
            }]
        }
        EditOp::Delete { pos, len } => {
            if *pos >= at {
                vec![EditOp::Delete {
                    pos: pos + ins_len,
                    len: *len,
                }]
            } else if pos + len > at {
                // The insert landed inside the deleted range: split so the
                // concurrent insertion survives
                let head = at - pos;
                vec![
                    EditOp::Delete { pos: *pos, len: head },
                    EditOp::Delete {
                        pos: pos + ins_len,
                        len: len - head,
                    },
                ]
            } else {
                vec![op.clone()]
            }
        }
        EditOp::Retain { .. } => vec![op.clone()],
        EditOp::Replace { pos, len, text } => {
            // Transform as delete + insert, then recombine when contiguous
            let parts = transform_against_insert(
                &EditOp::Delete { pos: *pos, len: *len },
                at,
                ins_len,
                op_has_priority,
            );
            recombine_replace(parts, text)
        }
        EditOp::Move { from, len, to } => {
            let from = if *from >= at { from + ins_len } else { *from };
            let to = if *to >= at { to + ins_len } else { *to };
            vec![EditOp::Move { from, len: *len, to }]
        }
    }
}

fn transform_against_delete(op: &EditOp, at: usize, del_len: usize) -> Vec<EditOp> {
    let del_end = at + del_len;
    match op {
        EditOp::Insert { pos, text } => {
            let shifted = if *pos >= del_end {
                pos - del_len
            } else if *pos > at {
                at // insertion point was inside the removed range
            } else {
                *pos
            };
            vec![EditOp::Insert {
                pos: shifted,
                text: text.clone(),
            }]
        }
        EditOp::Delete { pos, len } => {
            let end = pos + len;
            if *pos >= del_end {
                vec![EditOp::Delete {
                    pos: pos - del_len,
                    len: *len,
                }]
            } else if end <= at {
                vec![op.clone()]
            } else {
                // Overlapping deletes: remove the shared range once
                let overlap = end.min(del_end) - (*pos).max(at);
                let remaining = len - overlap;
                if remaining == 0 {
                    vec![]
                } else {
                    vec![EditOp::Delete {
                        pos: (*pos).min(at),
                        len: remaining,
                    }]
                }
            }
        }
        EditOp::Retain { .. } => vec![op.clone()],
        EditOp::Replace { pos, len, text } => {
            let parts = transform_against_delete(&EditOp::Delete { pos: *pos, len: *len }, at, del_len);
            if parts.is_empty() {
                // The replaced range was fully removed concurrently; the
                // replacement text lands at the collapse point
                return vec![EditOp::Insert {
                    pos: at,
                    text: text.clone(),
                }];
            }
            recombine_replace(parts, text)
        }
        EditOp::Move { from, len, to } => {
            let from = if *from >= del_end {
                from - del_len
            } else if *from > at {
                at
            } else {
                *from
            };
            let to = if *to >= del_end {
                to - del_len
            } else if *to > at {
                at
            } else {
                *to
            };
            vec![EditOp::Move { from, len: *len, to }]
        }
    }
}

fn recombine_replace(delete_parts: Vec<EditOp>, text: &str) -> Vec<EditOp> {
    match delete_parts.as_slice() {
        [] => Vec::new(),
        [EditOp::Delete { pos, len }] => vec![EditOp::Replace {
            pos: *pos,
            len: *len,
            text: text.to_string(),
        }],
        parts => {
            // The range was split; keep the deletes and re-insert once at
            // the head position
            let mut ops = parts.to_vec();
            if let Some(EditOp::Delete { pos, .. }) = parts.first() {
                ops.push(EditOp::Insert {
                    pos: *pos,
                    text: text.to_string(),
                });
            }
            ops
        }
    }
}

/// Transform a whole edit sequence against every concurrent operation
pub fn transform_sequence(
    ops: &[EditOp],
    against: &[EditOp],
    ops_have_priority: bool,
) -> Vec<EditOp> {
    let mut result: Vec<EditOp> = ops.to_vec();
    for concurrent in against {
        result = result
            .iter()
            .flat_map(|op| transform_op(op, concurrent, ops_have_priority))
            .collect();
    }
    result
}

/// Apply an edit sequence to a document
pub fn apply(base: &str, ops: &[EditOp]) -> AxonResult<String> {
    let mut chars: Vec<char> = base.chars().collect();
    for op in ops {
        apply_one(&mut chars, op)?;
    }
    Ok(chars.into_iter().collect())
}

fn apply_one(chars: &mut Vec<char>, op: &EditOp) -> AxonResult<()> {
    let oob = |what: &str| AxonError::internal(format!("edit out of bounds: {}", what));
    match op {
        EditOp::Retain { .. } => Ok(()),
        EditOp::Insert { pos, text } => {
            if *pos > chars.len() {
                return Err(oob("insert position"));
            }
            chars.splice(pos..pos, text.chars());
            Ok(())
        }
        EditOp::Delete { pos, len } => {
            if pos + len > chars.len() {
                return Err(oob("delete range"));
            }
            chars.drain(*pos..*pos + *len);
            Ok(())
        }
        EditOp::Replace { pos, len, text } => {
            if pos + len > chars.len() {
                return Err(oob("replace range"));
            }
            chars.splice(*pos..*pos + *len, text.chars());
            Ok(())
        }
        EditOp::Move { from, len, to } => {
            if from + len > chars.len() {
                return Err(oob("move source"));
            }
            let moved: Vec<char> = chars.drain(*from..*from + *len).collect();
            if *to > chars.len() {
                return Err(oob("move target"));
            }
            chars.splice(to..to, moved);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_insert_converges() {
        let base = "abc";
        let a = EditOp::Insert { pos: 1, text: "X".to_string() };
        let b = EditOp::Insert { pos: 2, text: "Y".to_string() };

        // Site 1: apply a, then b transformed against a
        let b_at_1 = transform_op(&b, &a, false);
        let doc1 = apply(&apply(base, &[a.clone()]).unwrap(), &b_at_1).unwrap();

        // Site 2: apply b, then a transformed against b
        let a_at_2 = transform_op(&a, &b, true);
        let doc2 = apply(&apply(base, &[b]).unwrap(), &a_at_2).unwrap();

        assert_eq!(doc1, doc2);
        assert_eq!(doc1, "aXbYc");
    }

    #[test]
    fn test_same_position_inserts_tie_break() {
        let base = "ab";
        let a = EditOp::Insert { pos: 1, text: "X".to_string() };
        let b = EditOp::Insert { pos: 1, text: "Y".to_string() };

        // a has priority (its agent sorts first): a stays, b shifts
        let b_shifted = transform_op(&b, &a, false);
        let doc1 = apply(&apply(base, &[a.clone()]).unwrap(), &b_shifted).unwrap();

        let a_kept = transform_op(&a, &b, true);
        let doc2 = apply(&apply(base, &[b]).unwrap(), &a_kept).unwrap();

        assert_eq!(doc1, doc2);
        assert_eq!(doc1, "aXYb");
    }

    #[test]
    fn test_delete_delete_overlap_converges() {
        let base = "abcdef";
        let a = EditOp::Delete { pos: 1, len: 3 }; // remove bcd
        let b = EditOp::Delete { pos: 2, len: 3 }; // remove cde

        let b_t = transform_op(&b, &a, false);
        let doc1 = apply(&apply(base, &[a.clone()]).unwrap(), &b_t).unwrap();

        let a_t = transform_op(&a, &b, true);
        let doc2 = apply(&apply(base, &[b]).unwrap(), &a_t).unwrap();

        assert_eq!(doc1, doc2);
        assert_eq!(doc1, "af");
    }

    #[test]
    fn test_insert_inside_concurrent_delete_survives() {
        let base = "abcdef";
        let del = EditOp::Delete { pos: 1, len: 4 }; // remove bcde
        let ins = EditOp::Insert { pos: 3, text: "X".to_string() };

        // Site 1 deletes first, then applies the transformed insert
        let ins_t = transform_op(&ins, &del, false);
        let doc1 = apply(&apply(base, &[del.clone()]).unwrap(), &ins_t).unwrap();

        // Site 2 inserts first, then applies the split delete
        let del_t = transform_op(&del, &ins, true);
        let doc2 = apply(&apply(base, &[ins]).unwrap(), &del_t).unwrap();

        assert_eq!(doc1, doc2);
        assert_eq!(doc1, "aXf");
    }

    #[test]
    fn test_transform_sequence() {
        let base = "hello world";
        let local = vec![EditOp::Insert { pos: 5, text: ",".to_string() }];
        let remote = vec![EditOp::Replace { pos: 6, len: 5, text: "swarm".to_string() }];

        let remote_t = transform_sequence(&remote, &local, false);
        let doc1 = apply(&apply(base, &local).unwrap(), &remote_t).unwrap();

        let local_t = transform_sequence(&local, &remote, true);
        let doc2 = apply(&apply(base, &remote).unwrap(), &local_t).unwrap();

        assert_eq!(doc1, doc2);
        assert_eq!(doc1, "hello, swarm");
    }

    #[test]
    fn test_apply_rejects_out_of_bounds() {
        assert!(apply("ab", &[EditOp::Delete { pos: 1, len: 5 }]).is_err());
        assert!(apply("ab", &[EditOp::Insert { pos: 9, text: "x".to_string() }]).is_err());
    }

    #[test]
    fn test_move_applies() {
        let doc = apply(
            "abcdef",
            &[EditOp::Move { from: 0, len: 2, to: 4 }],
        )
        .unwrap();
        assert_eq!(doc, "cdefab");
    }
}
