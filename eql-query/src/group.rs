//! Grouping: partitioning upstream emissions by key tuples.
//!
//! Groups keep the insertion order of the first occurrence of each key
//! tuple, and within a group the contributor bindings keep their
//! upstream order. The multiset union of contributors across groups
//! is exactly the upstream multiset.

use indexmap::IndexMap;

use eql_symbols::GroupKey;

use crate::binding::Binding;
use crate::error::EqlError;
use crate::eval::resolve_value;
use crate::graph::{ExprGraph, NodeId};

/// Partition `rows` by the tuple of key values. With no keys, all
/// rows form a single group (the whole-stream fold).
pub(crate) fn partition(
    graph: &ExprGraph,
    keys: &[NodeId],
    rows: Vec<Binding>,
) -> Result<IndexMap<Vec<GroupKey>, Vec<Binding>>, EqlError> {
    let mut groups: IndexMap<Vec<GroupKey>, Vec<Binding>> = IndexMap::new();
    if keys.is_empty() {
        groups.insert(Vec::new(), rows);
        return Ok(groups);
    }
    for binding in rows {
        let key = keys
            .iter()
            .map(|node| resolve_value(graph, *node, &binding).map(|v| GroupKey::from(&v)))
            .collect::<Result<Vec<_>, _>>()?;
        groups.entry(key).or_default().push(binding);
    }
    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::VariableId;
    use crate::expr::Domain;
    use crate::graph::NodeKind;
    use eql_symbols::{TypeInfo, Value};

    static ANY: TypeInfo = TypeInfo::new("any", None);

    #[test]
    fn groups_preserve_first_occurrence_order() {
        let mut graph = ExprGraph::new();
        let var = VariableId::fresh();
        let key = graph
            .add(NodeKind::Variable {
                var,
                name: "k".into(),
                ty: &ANY,
                domain: Domain::Explicit(Vec::new()),
            })
            .unwrap();
        graph.freeze();

        let rows: Vec<Binding> = [2, 1, 2, 3, 1]
            .iter()
            .map(|n| Binding::new().with(var, Value::Integer(*n)))
            .collect();
        let groups = partition(&graph, &[key], rows).unwrap();

        let order: Vec<_> = groups.keys().cloned().collect();
        assert_eq!(
            order,
            vec![
                vec![GroupKey::Integer(2)],
                vec![GroupKey::Integer(1)],
                vec![GroupKey::Integer(3)],
            ]
        );
        assert_eq!(groups[&vec![GroupKey::Integer(2)]].len(), 2);

        let total: usize = groups.values().map(Vec::len).sum();
        assert_eq!(total, 5);
    }

    #[test]
    fn no_keys_means_one_group() {
        let graph = {
            let mut g = ExprGraph::new();
            g.freeze();
            g
        };
        let rows = vec![Binding::new(), Binding::new()];
        let groups = partition(&graph, &[], rows).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&Vec::new()].len(), 2);
    }
}
