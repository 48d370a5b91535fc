//! Query AST
//!
//! Node values are produced by the builder (already normalized and
//! field-resolved) and consumed into a plan; nodes are plain values with no
//! shared mutation.

/// Boolean combination operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// A node of the compiled query tree.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// A single token, optionally field-restricted. Fuzzy terms carry a
    /// pre-built trigram expression; `is_heuristic_fuzzy` marks terms the
    /// parse policy flagged rather than an explicit fuzzy request.
    Term {
        field: Option<String>,
        value: String,
        trigram_expr: Option<String>,
        requires_all_trigrams: bool,
        max_edit_distance: Option<u32>,
        is_heuristic_fuzzy: bool,
    },
    /// An exact phrase (normalized).
    Phrase {
        field: Option<String>,
        value: String,
    },
    /// Two tokens within `distance` positions of each other (distance >= 1).
    Proximity {
        field: Option<String>,
        first: String,
        second: String,
        distance: u32,
    },
    /// A prefix query; `value` ends with `*`.
    Prefix {
        field: Option<String>,
        value: String,
    },
    /// A wildcard pattern containing `*` or `?`; served by the trigram index.
    Wildcard {
        field: Option<String>,
        pattern: String,
    },
    /// And/Or over one or more children (same-op children are flattened).
    Boolean {
        op: BoolOp,
        children: Vec<QueryNode>,
    },
    /// Negation of a single operand.
    Not { operand: Box<QueryNode> },
}

impl QueryNode {
    /// Combine nodes with AND. Nulls are dropped, children that are
    /// themselves AND groups are absorbed, and a single survivor collapses
    /// to itself.
    #[must_use]
    pub fn and(nodes: impl IntoIterator<Item = Option<QueryNode>>) -> Option<QueryNode> {
        Self::combine(BoolOp::And, nodes)
    }

    /// Combine nodes with OR, with the same absorption rules as [`and`].
    ///
    /// [`and`]: QueryNode::and
    #[must_use]
    pub fn or(nodes: impl IntoIterator<Item = Option<QueryNode>>) -> Option<QueryNode> {
        Self::combine(BoolOp::Or, nodes)
    }

    /// Wrap a node in a negation. `None` stays `None`.
    #[must_use]
    pub fn negate(node: Option<QueryNode>) -> Option<QueryNode> {
        node.map(|operand| QueryNode::Not {
            operand: Box::new(operand),
        })
    }

    fn combine(
        op: BoolOp,
        nodes: impl IntoIterator<Item = Option<QueryNode>>,
    ) -> Option<QueryNode> {
        let mut children: Vec<QueryNode> = Vec::new();
        for node in nodes.into_iter().flatten() {
            match node {
                QueryNode::Boolean {
                    op: child_op,
                    children: grandchildren,
                } if child_op == op => children.extend(grandchildren),
                other => children.push(other),
            }
        }

        match children.len() {
            0 => None,
            1 => Some(children.remove(0)),
            _ => Some(QueryNode::Boolean { op, children }),
        }
    }
}
