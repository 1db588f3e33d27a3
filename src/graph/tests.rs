use super::subgroup::SubgroupFunction;
use super::*;
use crate::dimensions::Dimensions;
use crate::error::GraphError;
use crate::hash::StructuralHash;
use crate::operation::{GroupDispatchFn, GroupInput, GroupPlan, Operation, Registry};
use crate::value::{Value, ValueType};
use float_cmp::assert_approx_eq;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

const SCALAR: Dimensions = Dimensions::scalar(4);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_registry() -> (Arc<Registry>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = Registry::new();

    let counter = Arc::clone(&calls);
    registry
        .add(
            Operation::simple(
                "f.add",
                &[ValueType::F32, ValueType::F32],
                ValueType::F32,
                move |v, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::F32(v[0].as_f32()? + v[1].as_f32()?))
                },
            )
            .unwrap(),
        )
        .unwrap();

    let counter = Arc::clone(&calls);
    registry
        .add(
            Operation::one_to_one("f.neg", &[ValueType::F32], ValueType::F32, move |v, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Value::F32(-v[0].as_f32()?))
            })
            .unwrap(),
        )
        .unwrap();

    let counter = Arc::clone(&calls);
    registry
        .add(
            Operation::one_to_one(
                "f.scale",
                &[ValueType::F32, ValueType::F32],
                ValueType::F32,
                move |v, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::F32(v[0].as_f32()? * v[1].as_f32()?))
                },
            )
            .unwrap(),
        )
        .unwrap();

    let counter = Arc::clone(&calls);
    registry
        .add(
            Operation::n_to_one("f.blur", &[ValueType::F32], ValueType::F32, move |v, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(v[0].clone())
            })
            .unwrap(),
        )
        .unwrap();

    (Arc::new(registry), calls)
}

fn listener(slot: &Arc<NodeSlot>) -> Option<Weak<dyn RewriteListener>> {
    let listener: Arc<dyn RewriteListener> = slot.clone();
    Some(Arc::downgrade(&listener))
}

/// const 1.0 followed by three chained negations; the last one referenced.
fn neg_chain(graph: &mut Graph) -> (NodeId, ReferenceKey) {
    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[n1]).unwrap();
    let n3 = graph.add_node("f.neg", SCALAR, &[n2]).unwrap();
    let key = graph.reference(n3, None).unwrap();
    (n3, key)
}

#[test]
fn test_interning_dedups_structure() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(2.0)).unwrap();
    let b = graph.add_constant(Value::F32(3.0)).unwrap();
    let x = graph.add_node("f.add", SCALAR, &[a, b]).unwrap();
    let y = graph.add_node("f.add", SCALAR, &[a, b]).unwrap();

    assert_eq!(x, y);
    assert_eq!(graph.add_constant(Value::F32(2.0)).unwrap(), a);
    assert_eq!(graph.size(), 3);
    assert_eq!(graph.outputs(a).unwrap(), &[x]);

    // argument order is part of the structure
    let z = graph.add_node("f.add", SCALAR, &[b, a]).unwrap();
    assert_ne!(x, z);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_construction_checks() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);
    let a = graph.add_constant(Value::F32(2.0)).unwrap();
    let i = graph.add_constant(Value::I32(2)).unwrap();

    assert!(matches!(
        graph.add_node("f.add", SCALAR, &[a]),
        Err(GraphError::ArityMismatch {
            expected: 2,
            got: 1,
            ..
        })
    ));
    assert!(matches!(
        graph.add_node("f.neg", SCALAR, &[i]),
        Err(GraphError::InputTypeMismatch {
            index: 0,
            expected: ValueType::F32,
            got: ValueType::I32,
            ..
        })
    ));
    assert!(matches!(
        graph.add_node("f.nope", SCALAR, &[a]),
        Err(GraphError::UnknownOperation(_))
    ));
    assert!(matches!(
        graph.add_node("f.neg", SCALAR, &[NodeId(17)]),
        Err(GraphError::InvalidNode(NodeId(17)))
    ));
    assert_eq!(graph.size(), 2);
}

#[test]
fn test_hash_collision_is_reported() {
    let (registry, _) = test_registry();
    let constant = registry.find_constant(ValueType::F32).unwrap();
    let neg = registry.find("f.neg").unwrap();
    let mut graph = Graph::new(registry);

    let hash = StructuralHash(42);
    let first = graph
        .intern(constant, SCALAR, hash, 0, &[], Some(Value::F32(1.0)))
        .unwrap();
    assert_eq!(
        graph.intern(constant, SCALAR, hash, 0, &[], None).unwrap(),
        first
    );

    let err = graph
        .intern(constant, Dimensions::grid(2, 2, 4), hash, 0, &[], None)
        .unwrap_err();
    assert!(matches!(
        err,
        GraphError::HashCollision { existing, .. } if existing == first
    ));
    assert!(matches!(
        graph.intern(neg, SCALAR, hash, 0, &[], None),
        Err(GraphError::HashCollision { .. })
    ));
    assert_eq!(graph.size(), 1);
}

#[test]
fn test_add_end_to_end_with_cached_read() {
    init_logger();
    let (registry, calls) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(2.0)).unwrap();
    let b = graph.add_constant(Value::F32(3.0)).unwrap();
    let x = graph.add_node("f.add", SCALAR, &[a, b]).unwrap();
    let key = graph.reference(x, None).unwrap();

    let value = graph.get_value(x).unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), 5.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // the constants were only needed to compute x
    assert_eq!(graph.size(), 1);
    let x = graph.referenced_node(key).unwrap();
    assert!(graph.node(x).unwrap().inputs().is_empty());

    let again = graph.get_value(x).unwrap();
    assert_approx_eq!(f32, again.as_f32().unwrap(), 5.0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_reference_follows_compaction() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    graph.add_constant(Value::F32(9.0)).unwrap();
    let a = graph.add_constant(Value::F32(2.0)).unwrap();
    let b = graph.add_constant(Value::F32(3.0)).unwrap();
    let x = graph.add_node("f.add", SCALAR, &[a, b]).unwrap();
    assert_eq!(x, NodeId(3));

    let slot = NodeSlot::new(x);
    let key = graph.reference(x, listener(&slot)).unwrap();
    assert_eq!(graph.reference_count(x), 1);

    assert_eq!(graph.clean_graph().unwrap(), 1);
    assert_eq!(slot.get(), NodeId(2));
    assert_eq!(graph.referenced_node(key), Some(NodeId(2)));
    assert_eq!(graph.operation_of(slot.get()).unwrap().name(), "f.add");
    assert!(graph.validate().is_ok());

    assert_eq!(graph.clean_graph().unwrap(), 0);
    assert_eq!(graph.size(), 3);

    graph.unreference(key).unwrap();
    assert_eq!(graph.clean_graph().unwrap(), 3);
    assert!(graph.is_empty());
    assert!(matches!(
        graph.unreference(key),
        Err(GraphError::UnknownReference)
    ));
}

#[test]
fn test_remove_node() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(2.0)).unwrap();
    let x = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let y = graph.add_node("f.add", SCALAR, &[a, a]).unwrap();
    graph.reference(x, None).unwrap();

    assert!(matches!(
        graph.remove_node(x),
        Err(GraphError::ReferencedNode(_))
    ));
    assert!(matches!(
        graph.remove_node(a),
        Err(GraphError::NodeHasOutputs(_))
    ));

    graph.remove_node(y).unwrap();
    assert!(graph.node(y).unwrap().is_cleared());
    assert_eq!(graph.outputs(a).unwrap(), &[x]);
    assert!(graph.validate().is_ok());

    assert_eq!(graph.clean_graph().unwrap(), 1);
    assert_eq!(graph.size(), 2);
    let y = graph.add_node("f.add", SCALAR, &[a, a]).unwrap();
    assert_eq!(y, NodeId(2));
}

#[test]
fn test_rotate_node() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let b = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[b]).unwrap();
    let s = graph.add_node("f.add", SCALAR, &[n1, n2]).unwrap();
    let slot = NodeSlot::new(n1);
    graph.reference(n1, listener(&slot)).unwrap();

    graph.rotate_node(n2, NodeId(2)).unwrap();
    assert_eq!(slot.get(), NodeId(3));
    assert_eq!(graph.inputs(s).unwrap(), &[NodeId(3), NodeId(2)]);
    assert_eq!(graph.inputs(NodeId(2)).unwrap(), &[b]);
    assert_eq!(graph.outputs(b).unwrap(), &[NodeId(2)]);
    assert!(graph.validate().is_ok());

    assert!(matches!(
        graph.rotate_node(s, NodeId(2)),
        Err(GraphError::RotateViolation { blocker: NodeId(3), .. })
    ));
    assert!(matches!(
        graph.rotate_node(NodeId(3), s),
        Err(GraphError::RotateViolation { blocker, .. }) if blocker == s
    ));
    assert!(graph.validate().is_ok());

    // constants carry no edges that could block them
    graph.rotate_node(a, b).unwrap();
    assert_eq!(graph.outputs(NodeId(1)).unwrap(), &[slot.get()]);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_move_constants_keeps_order() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let n = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let c = graph.add_constant(Value::F32(2.0)).unwrap();
    let s = graph.add_node("f.add", SCALAR, &[n, c]).unwrap();
    assert_eq!((n, c, s), (NodeId(1), NodeId(2), NodeId(3)));

    graph.move_constants().unwrap();
    assert!(graph.node(NodeId(1)).unwrap().has_value());
    assert_eq!(graph.inputs(NodeId(2)).unwrap(), &[NodeId(0)]);
    assert_eq!(graph.inputs(s).unwrap(), &[NodeId(2), NodeId(1)]);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_grouping_builds_chain() {
    init_logger();
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);
    let (n3, _) = neg_chain(&mut graph);

    graph.optimize().unwrap();
    let groups = graph.subgroups();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members(), &[NodeId(1), NodeId(2), n3]);
    assert_eq!(groups[0].inputs().collect::<Vec<_>>(), vec![NodeId(0)]);
    assert_eq!(groups[0].outputs(), &[n3]);
    assert!(graph.node(NodeId(2)).unwrap().flags().in_subgroup());
    assert!(graph.node(NodeId(1)).unwrap().flags().is_rvalue());
    assert!(!graph.node(n3).unwrap().flags().is_rvalue());
}

#[test]
fn test_grouped_chain_evaluates() {
    let (registry, calls) = test_registry();
    let mut graph = Graph::new(registry);
    let (n3, key) = neg_chain(&mut graph);

    let value = graph.get_value(n3).unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), -1.0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(graph.size(), 1);
    assert_eq!(graph.referenced_node(key), Some(NodeId(0)));
    assert!(graph.subgroups().is_empty());
}

#[test]
fn test_split_subgroup() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);
    let (n3, _) = neg_chain(&mut graph);
    graph.optimize().unwrap();

    let split = graph.split_subgroup(0, NodeId(1)).unwrap();
    assert_eq!(split, Some(1));
    assert_eq!(graph.subgroups()[0].members(), &[NodeId(1)]);
    assert_eq!(graph.subgroups()[1].members(), &[NodeId(2), n3]);
    assert_eq!(graph.subgroup_of(n3), Some(1));

    assert_eq!(graph.split_subgroup(1, n3).unwrap(), None);
    assert!(matches!(
        graph.split_subgroup(0, n3),
        Err(GraphError::InvalidNode(_))
    ));
}

#[test]
fn test_joining_rotates_next_to_group() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let b = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let m = graph.add_node("f.neg", SCALAR, &[b]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[n1]).unwrap();
    let m_key = graph.reference(m, None).unwrap();
    let n2_key = graph.reference(n2, None).unwrap();

    graph.optimize().unwrap();
    assert_eq!(graph.referenced_node(n2_key), Some(NodeId(3)));
    assert_eq!(graph.referenced_node(m_key), Some(NodeId(4)));
    assert_eq!(graph.subgroups()[0].members(), &[n1, NodeId(3)]);
    assert_eq!(graph.subgroup_of(NodeId(4)), Some(1));
    assert!(graph.validate().is_ok());
}

#[test]
fn test_joining_without_colocation() {
    let (registry, _) = test_registry();
    let mut graph = Graph::with_config(registry, GraphConfig::default().with_colocation(false));

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let b = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let m = graph.add_node("f.neg", SCALAR, &[b]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[n1]).unwrap();
    graph.reference(m, None).unwrap();
    graph.reference(n2, None).unwrap();

    graph.optimize().unwrap();
    assert_eq!(graph.subgroups()[0].members(), &[n1, n2]);
    assert_eq!(graph.subgroup_of(m), Some(1));
}

#[test]
fn test_can_merge_rejects_n_to_one_dependency() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let c = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let blur = graph.add_node("f.blur", SCALAR, &[n1]).unwrap();
    let m = graph.add_node("f.neg", SCALAR, &[c]).unwrap();
    graph.reference(blur, None).unwrap();
    graph.reference(m, None).unwrap();

    graph.optimize().unwrap();
    assert_eq!(graph.subgroups().len(), 3);
    assert_eq!(graph.subgroup_of(blur), Some(1));

    assert!(!graph.can_merge(0, 1).unwrap());
    assert!(!graph.merge_subgroups(0, 1).unwrap());
    assert!(graph.can_merge(0, 2).unwrap());
    assert!(graph.can_merge(1, 2).unwrap());

    assert!(graph.merge_subgroups(0, 2).unwrap());
    assert_eq!(graph.subgroups()[0].members(), &[n1, m]);
    assert!(graph.subgroups()[2].is_empty());
    assert!(matches!(
        graph.can_merge(9, 0),
        Err(GraphError::InvalidSubgroup(9))
    ));
}

#[test]
fn test_multi_input_fusion() {
    let (registry, calls) = test_registry();
    let config = GraphConfig::default().with_multi_input_fusion(true);
    let mut graph = Graph::with_config(Arc::clone(&registry), config);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let b = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[b]).unwrap();
    let s = graph.add_node("f.scale", SCALAR, &[n1, n2]).unwrap();
    graph.reference(s, None).unwrap();

    graph.optimize().unwrap();
    assert_eq!(graph.subgroups().len(), 1);
    assert_eq!(graph.subgroups()[0].members(), &[n1, n2, s]);

    let value = graph.get_value(s).unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), 2.0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let mut plain = Graph::new(registry);
    let a = plain.add_constant(Value::F32(1.0)).unwrap();
    let b = plain.add_constant(Value::F32(2.0)).unwrap();
    let n1 = plain.add_node("f.neg", SCALAR, &[a]).unwrap();
    let n2 = plain.add_node("f.neg", SCALAR, &[b]).unwrap();
    let s = plain.add_node("f.scale", SCALAR, &[n1, n2]).unwrap();
    plain.reference(s, None).unwrap();
    plain.optimize().unwrap();
    assert_eq!(plain.subgroups().len(), 3);
}

#[test]
fn test_fused_run_stores_only_escaping_values() {
    let (registry, calls) = test_registry();
    let mut graph = Graph::new(registry);
    let (n3, _) = neg_chain(&mut graph);
    graph.optimize().unwrap();

    let function = SubgroupFunction::new(&graph, &graph.subgroups()[0]).unwrap();
    assert!(!function.is_fused());
    assert!(function.is_ready(&graph).unwrap());
    assert_eq!(function.run(&mut graph).unwrap(), 3);

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!graph.node(NodeId(1)).unwrap().has_value());
    assert!(!graph.node(NodeId(2)).unwrap().has_value());
    let value = graph.node(n3).unwrap().value().cloned().unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), -1.0);
    // the constant input is never released
    assert!(graph.node(NodeId(0)).unwrap().has_value());
}

#[test]
fn test_group_factory_dispatches_once() {
    let direct = Arc::new(AtomicUsize::new(0));
    let built = Arc::new(AtomicUsize::new(0));
    let dispatched = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&direct);
    let (factories, dispatches) = (Arc::clone(&built), Arc::clone(&dispatched));
    let neg = Operation::one_to_one("f.neg", &[ValueType::F32], ValueType::F32, move |v, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Value::F32(-v[0].as_f32()?))
    })
    .unwrap()
    .with_group_factory(move |plan: &GroupPlan| {
        factories.fetch_add(1, Ordering::SeqCst);
        if !plan.is_uniform("f.neg") || plan.input_count != 1 || plan.outputs.len() != 1 {
            return None;
        }
        let flips = plan.members.len();
        let dispatches = Arc::clone(&dispatches);
        let dispatch: GroupDispatchFn =
            Box::new(move |values: &[Value]| -> crate::error::Result<Vec<Value>> {
                dispatches.fetch_add(1, Ordering::SeqCst);
                let x = values[0].as_f32()?;
                Ok(vec![Value::F32(if flips % 2 == 0 { x } else { -x })])
            });
        Some(dispatch)
    })
    .unwrap();
    let mut registry = Registry::new();
    registry.add(neg).unwrap();

    let mut graph = Graph::new(Arc::new(registry));
    let (n3, key) = neg_chain(&mut graph);
    graph.optimize().unwrap();

    let plan = graph.group_plan(0).unwrap();
    assert_eq!(plan.members.len(), 3);
    assert_eq!(plan.input_count, 1);
    assert_eq!(plan.outputs, vec![2]);
    assert_eq!(plan.members[0].inputs.as_slice(), &[GroupInput::Boundary(0)]);
    assert_eq!(plan.members[2].inputs.as_slice(), &[GroupInput::Member(1)]);
    assert!(matches!(
        graph.group_plan(1),
        Err(GraphError::InvalidSubgroup(1))
    ));

    let value = graph.get_value(n3).unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), -1.0);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(direct.load(Ordering::SeqCst), 0);
    assert_eq!(graph.referenced_node(key), Some(NodeId(0)));
    assert!(graph.validate().is_ok());
}

#[test]
fn test_grouping_keeps_simple_consumer_outside() {
    let (registry, calls) = test_registry();

    // consumer on the tail: the group stays whole, its tail escapes
    let mut graph = Graph::new(Arc::clone(&registry));
    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let c = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[n1]).unwrap();
    let s = graph.add_node("f.add", SCALAR, &[n2, c]).unwrap();
    graph.reference(s, None).unwrap();

    graph.optimize().unwrap();
    assert_eq!(graph.subgroups().len(), 1);
    assert_eq!(graph.subgroups()[0].members(), &[n1, n2]);
    assert_eq!(graph.subgroups()[0].outputs(), &[n2]);
    assert_eq!(graph.subgroup_of(s), None);
    assert!(!graph.node(s).unwrap().flags().in_subgroup());

    let value = graph.get_value(s).unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), 3.0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // consumer in the middle: the chain is cut there
    let mut graph = Graph::new(registry);
    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let c = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[n1]).unwrap();
    let s = graph.add_node("f.add", SCALAR, &[n1, c]).unwrap();
    graph.reference(n2, None).unwrap();
    graph.reference(s, None).unwrap();

    graph.optimize().unwrap();
    assert_eq!(graph.subgroups().len(), 2);
    assert_eq!(graph.subgroups()[0].members(), &[n1]);
    assert_eq!(graph.subgroups()[0].outputs(), &[n1]);
    assert_eq!(graph.subgroups()[1].members(), &[n2]);
    assert_eq!(graph.subgroup_of(s), None);

    let value = graph.get_value(s).unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), 1.0);
    assert!(graph.validate().is_ok());
}

#[test]
fn test_optimize_is_idempotent() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let c = graph.add_constant(Value::F32(2.0)).unwrap();
    let n1 = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let m = graph.add_node("f.neg", SCALAR, &[c]).unwrap();
    let n2 = graph.add_node("f.neg", SCALAR, &[n1]).unwrap();
    let blur = graph.add_node("f.blur", SCALAR, &[n2]).unwrap();
    let n3 = graph.add_node("f.neg", SCALAR, &[blur]).unwrap();
    graph.reference(m, None).unwrap();
    graph.reference(n3, None).unwrap();

    graph.optimize().unwrap();
    let order: Vec<StructuralHash> = graph.iter().map(|node| node.hash()).collect();
    let groups = graph.subgroups().to_vec();
    // n2 was pulled next to n1
    assert_eq!(groups[0].members(), &[n1, NodeId(3)]);

    graph.optimize().unwrap();
    let again: Vec<StructuralHash> = graph.iter().map(|node| node.hash()).collect();
    assert_eq!(again, order);
    assert_eq!(graph.subgroups(), groups.as_slice());
    assert!(graph.validate().is_ok());
}

#[test]
fn test_deferred_subgroup_runs_at_later_member() {
    let (registry, calls) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let n = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let u = graph.add_node("f.blur", SCALAR, &[a]).unwrap();
    let x = graph.add_node("f.scale", SCALAR, &[n, u]).unwrap();
    graph.reference(x, None).unwrap();

    // u sits between the members and is only ready once visited
    graph.subgroups = vec![Subgroup {
        members: vec![n, x],
        ..Subgroup::default()
    }];
    graph.node_to_subgroup.insert(n, 0);
    graph.node_to_subgroup.insert(x, 0);

    graph.evaluate(x).unwrap();
    let value = graph.node(x).unwrap().value().cloned().unwrap();
    assert_approx_eq!(f32, value.as_f32().unwrap(), -1.0);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(!graph.node(n).unwrap().has_value());
}

#[test]
fn test_unready_subgroup_is_not_revisited() {
    init_logger();
    let (registry, calls) = test_registry();
    let mut graph = Graph::new(registry);

    let a = graph.add_constant(Value::F32(1.0)).unwrap();
    let u = graph.add_node("f.blur", SCALAR, &[a]).unwrap();
    let n = graph.add_node("f.neg", SCALAR, &[a]).unwrap();
    let w = graph.add_node("f.neg", SCALAR, &[u]).unwrap();
    graph.reference(n, None).unwrap();
    graph.reference(w, None).unwrap();

    graph.subgroups = vec![Subgroup {
        members: vec![n, w],
        ..Subgroup::default()
    }];
    graph.node_to_subgroup.insert(n, 0);
    graph.node_to_subgroup.insert(w, 0);

    // u is not an ancestor of n, so the group never becomes ready
    graph.evaluate(n).unwrap();
    assert!(!graph.node(n).unwrap().has_value());
    assert!(!graph.node(u).unwrap().has_value());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_has_ancestor() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);
    let (n3, _) = neg_chain(&mut graph);

    assert!(graph.has_ancestor(n3, NodeId(0)).unwrap());
    assert!(graph.has_ancestor(n3, NodeId(1)).unwrap());
    assert!(!graph.has_ancestor(NodeId(0), n3).unwrap());
    assert!(!graph.has_ancestor(n3, n3).unwrap());

    let set = [NodeId(1), NodeId(2)].into_iter().collect();
    assert!(graph.has_ancestor_in(n3, &set).unwrap());
    assert!(!graph.has_ancestor_in(NodeId(1), &set).unwrap());
}

#[test]
fn test_copy_and_move_between_graphs() {
    let (registry, _) = test_registry();
    let mut source = Graph::new(Arc::clone(&registry));
    let a = source.add_constant(Value::F32(2.0)).unwrap();
    let b = source.add_constant(Value::F32(3.0)).unwrap();
    let x = source.add_node("f.add", SCALAR, &[a, b]).unwrap();

    let mut target = Graph::new(Arc::clone(&registry));
    let copied = target.copy_node(&source, x).unwrap();
    assert_eq!(target.size(), 3);
    assert_eq!(target.copy_node(&source, x).unwrap(), copied);
    assert_eq!(source.size(), 3);
    assert_eq!(
        target.node(copied).unwrap().hash(),
        source.node(x).unwrap().hash()
    );

    let mut other = Graph::new(Arc::clone(&registry));
    let moved = other.move_node(&mut source, x).unwrap();
    assert!(source.is_empty());
    assert!(other.validate().is_ok());

    // rvalue status comes from the consumer count, not from the move
    assert!(!other.node(moved).unwrap().flags().is_rvalue());
    let y = other.add_node("f.neg", SCALAR, &[moved]).unwrap();
    let key = other.reference(y, None).unwrap();
    other.optimize().unwrap();
    let y = other.referenced_node(key).unwrap();
    let moved = other.inputs(y).unwrap()[0];
    assert!(other.node(moved).unwrap().flags().is_rvalue());

    let (foreign, _) = test_registry();
    let mut stranger = Graph::new(foreign);
    assert!(matches!(
        stranger.copy_node(&target, copied),
        Err(GraphError::RegistryMismatch)
    ));
}

#[test]
fn test_duplicate_drops_references() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);
    let (n3, _) = neg_chain(&mut graph);

    let copy = graph.duplicate();
    assert_eq!(copy.size(), graph.size());
    assert_eq!(copy.reference_count(n3), 0);
    assert!(!copy.node(n3).unwrap().flags().has_external_ref());
    assert!(copy.validate().is_ok());
}

#[test]
fn test_dot_output_lists_nodes_and_clusters() {
    let (registry, _) = test_registry();
    let mut graph = Graph::new(registry);
    neg_chain(&mut graph);
    graph.optimize().unwrap();

    let dot = graph.to_dot();
    assert!(dot.starts_with("digraph"));
    assert!(dot.contains("subgraph cluster_0"));
    assert!(dot.contains("n0 -> n1;"));
    assert!(dot.contains("f.neg"));
    assert!(graph.references_dump().contains("#3 x1 f.neg"));
}

#[test]
fn test_random_graphs_keep_invariants() {
    init_logger();
    let (registry, _) = test_registry();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

    for _ in 0..20 {
        let mut graph = Graph::new(Arc::clone(&registry));
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(graph.add_constant(Value::F32(i as f32 + 1.0)).unwrap());
        }
        for _ in 0..30 {
            let lhs = ids[rng.gen_range(0..ids.len())];
            let id = if rng.gen_bool(0.5) {
                graph.add_node("f.neg", SCALAR, &[lhs]).unwrap()
            } else {
                let rhs = ids[rng.gen_range(0..ids.len())];
                graph.add_node("f.add", SCALAR, &[lhs, rhs]).unwrap()
            };
            ids.push(id);
        }
        assert!(graph.validate().is_ok());

        let mut keys = Vec::new();
        for &id in ids.iter().skip(4) {
            if rng.gen_bool(0.2) {
                keys.push(graph.reference(id, None).unwrap());
            }
        }
        keys.push(graph.reference(*ids.last().unwrap(), None).unwrap());

        graph.clean_graph().unwrap();
        assert!(graph.validate().is_ok());
        graph.optimize().unwrap();
        assert!(graph.validate().is_ok());

        let target = graph.referenced_node(keys[0]).unwrap();
        graph.get_value(target).unwrap();
        assert!(graph.validate().is_ok());
        for &key in &keys {
            let id = graph.referenced_node(key).unwrap();
            assert_eq!(graph.operation_of(id).unwrap().result_type(), ValueType::F32);
        }

        for key in keys {
            graph.unreference(key).unwrap();
        }
        graph.clean_graph().unwrap();
        assert!(graph.is_empty());
    }
}
