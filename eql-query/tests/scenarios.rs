//! End-to-end scenarios over the robot/item/connection domain.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;

use eql_query::prelude::*;
use eql_query::{max_, the};
use eql_symbols::Value;

use common::*;

#[tokio::test]
async fn filters_by_attribute_threshold() -> Result<()> {
    let r2d2 = robot("R2D2", "Astromech", 100);
    let c3po = robot("C3PO", "Protocol", 20);
    let bb8 = robot("BB8", "Astromech", 80);

    let r = variable(&ROBOT, values(&[r2d2.clone(), c3po, bb8.clone()]));
    let query = entity(&r).where_([r.attr("battery").gt(50)])?;

    let results = an(query).tolist().await?;
    assert_eq!(results, vec![Value::from(&r2d2), Value::from(&bb8)]);
    Ok(())
}

#[tokio::test]
async fn the_enforces_cardinality() -> Result<()> {
    let items = [
        item("SN001", "A"),
        item("SN002", "B"),
        item("SN001", "C"),
    ];

    let v = variable(&ITEM, values(&items));
    let query = entity(&v).where_([v.attr("serial").eq("SN001")])?;
    let err = the(query).first().await.unwrap_err();
    assert!(matches!(err, EqlError::MoreThanOneSolutionFound { .. }));

    let v = variable(&ITEM, values(&items));
    let query = entity(&v).where_([v.attr("serial").eq("SN002")])?;
    let found = the(query).first().await?;
    assert_eq!(attr_of(&found, "payload"), Value::Text("B".into()));
    Ok(())
}

#[tokio::test]
async fn grouping_with_having_filters_whole_groups() -> Result<()> {
    let robots = [
        robot("R2", "Astromech", 100),
        robot("BB", "Astromech", 80),
        robot("C3", "Protocol", 20),
        robot("C4", "Protocol", 25),
        robot("K2", "Security", 90),
    ];

    let r = variable(&ROBOT, values(&robots));
    let kind = r.attr("kind");
    let battery_total: Expr = sum(&r.attr("battery")).into();

    let query = entity(&kind)
        .grouped_by([kind.clone()])?
        .having([battery_total.gt(50)])?;

    let results = an(query).tolist().await?;
    assert_eq!(
        results,
        vec![Value::Text("Astromech".into()), Value::Text("Security".into())]
    );
    Ok(())
}

#[tokio::test]
async fn flatten_preserves_parent_bindings_and_source_order() -> Result<()> {
    let arm = part("Arm");
    let leg = part("Leg");
    let r2d2 = robot_with_parts("R2D2", 100, vec![arm.clone(), leg.clone()]);
    let other = robot_with_parts("BB8", 80, vec![part("Wheel")]);

    let r = variable(&ROBOT, values(&[r2d2, other]));
    let p = r.attr("parts").flat();
    let query = entity(&p).where_([r.attr("name").eq("R2D2")])?;

    let results = an(query).tolist().await?;
    assert_eq!(results, vec![Value::from(&arm), Value::from(&leg)]);
    Ok(())
}

#[tokio::test]
async fn rule_tree_selects_the_most_specific_conclusion() -> Result<()> {
    let c1 = connection(1);
    let c2 = connection(2);
    let c3 = connection(3);

    let c = variable(&CONNECTION, values(&[c1.clone(), c2.clone(), c3.clone()]));
    let views = deduced_variable(&VIEW);

    let query = entity(&c)
        .add(
            &views,
            inference(&VIEW, view_constructor(&VIEW)).kw("connection", &c),
        )?
        .refinement(c.attr("type").eq(1), |scope| {
            scope.add(
                &views,
                inference(&FIXED_VIEW, view_constructor(&FIXED_VIEW)).kw("connection", &c),
            );
        })?
        .alternative(c.attr("type").eq(2), |scope| {
            scope.add(
                &views,
                inference(&REVOLUTE_VIEW, view_constructor(&REVOLUTE_VIEW)).kw("connection", &c),
            );
        })?;

    let results = an(query).tolist().await?;
    assert_eq!(results.len(), 3);

    assert!(results[0].is_a(&FIXED_VIEW));
    assert_eq!(attr_of(&results[0], "connection"), Value::from(&c1));

    assert!(results[1].is_a(&REVOLUTE_VIEW));
    assert_eq!(attr_of(&results[1], "connection"), Value::from(&c2));

    assert!(results[2].is_a(&VIEW));
    assert!(!results[2].is_a(&FIXED_VIEW));
    assert!(!results[2].is_a(&REVOLUTE_VIEW));
    assert_eq!(attr_of(&results[2], "connection"), Value::from(&c3));
    Ok(())
}

#[tokio::test]
async fn repeated_evaluation_is_deterministic() -> Result<()> {
    let robots = [
        robot("A", "x", 3),
        robot("B", "y", 1),
        robot("C", "x", 2),
    ];

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([r.attr("battery").gt(1)])?;
    let mut quantified = an(query);

    let first = quantified.tolist().await?;
    let second = quantified.tolist().await?;
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    Ok(())
}

#[test]
fn clauses_freeze_after_build() {
    let r = variable(&ROBOT, Vec::new());
    let condition = r.attr("battery").gt(0);
    let mut query = entity(&r).where_([condition.clone()]).unwrap();
    query.build().unwrap();
    query.build().unwrap();

    let err = query.where_([condition]).err().expect("frozen query");
    assert_eq!(err, EqlError::QueryStructureFrozen);
}

#[test]
fn aggregation_in_where_is_a_build_error() {
    let r = variable(&ROBOT, Vec::new());
    let total: Expr = sum(&r.attr("battery")).into();
    let mut query = entity(&r).where_([total.gt(0)]).unwrap();
    let err = query.build().unwrap_err();
    assert!(matches!(err, EqlError::QueryStructureInvalid { .. }));
}

#[tokio::test]
async fn implicit_domains_read_the_registry_with_subtypes() -> Result<()> {
    let plain = robot("Plain", "generic", 10);
    let astro = astromech("Astro", 55);
    let registry = registry_of(&[plain.clone()]);
    registry.register(&astro);

    let r = variable(&ROBOT, &registry);
    let query = entity(&r).where_([r.attr("battery").gt(0)])?;
    let results = an(query).tolist().await?;
    assert_eq!(results, vec![Value::from(&plain), Value::from(&astro)]);

    let a = variable(&ASTROMECH, &registry);
    let narrow = entity(&a).where_([a.attr("battery").gt(0)])?;
    assert_eq!(an(narrow).tolist().await?, vec![Value::from(&astro)]);
    Ok(())
}

#[tokio::test]
async fn ordering_distinct_and_limit_shape_the_stream() -> Result<()> {
    let robots = [
        robot("A", "x", 20),
        robot("B", "y", 80),
        robot("C", "x", 20),
        robot("D", "z", 50),
    ];

    let r = variable(&ROBOT, values(&robots));
    let query = entity(r.attr("battery"))
        .distinct()?
        .ordered_by(r.attr("battery"), true)?
        .limit(2)?;

    let results = an(query).tolist().await?;
    assert_eq!(results, vec![Value::Integer(80), Value::Integer(50)]);
    Ok(())
}

#[tokio::test]
async fn disjunction_and_negation_compose() -> Result<()> {
    let robots = [
        robot("R2D2", "Astromech", 100),
        robot("C3PO", "Protocol", 20),
        robot("BB8", "Astromech", 80),
    ];

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([or_([
        r.attr("name").eq("C3PO"),
        not_(r.attr("kind").eq("Astromech")),
    ])])?;

    let results = an(query).tolist().await?;
    assert_eq!(results.len(), 1);
    assert_eq!(attr_of(&results[0], "name"), Value::Text("C3PO".into()));
    Ok(())
}

#[tokio::test]
async fn membership_tests_work_both_ways() -> Result<()> {
    let robots = [robot("A", "x", 1), robot("B", "y", 2), robot("C", "z", 3)];
    let wanted = Value::List(vec![Value::Text("A".into()), Value::Text("C".into())]);

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([in_(r.attr("name"), lit(wanted.clone()))])?;
    assert_eq!(an(query).tolist().await?.len(), 2);

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([contains(lit(wanted), r.attr("name"))])?;
    assert_eq!(an(query).tolist().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn universal_and_existential_conditions() -> Result<()> {
    let robots = [robot("A", "x", 10), robot("B", "y", 30), robot("C", "z", 20)];

    // The robot whose battery no other robot exceeds.
    let r = variable(&ROBOT, values(&robots));
    let other = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([for_all(
        vec![other.clone()],
        other.attr("battery").le(r.attr("battery")),
    )])?;
    let results = an(query).tolist().await?;
    assert_eq!(results.len(), 1);
    assert_eq!(attr_of(&results[0], "name"), Value::Text("B".into()));

    // Robots strictly below some other robot.
    let r = variable(&ROBOT, values(&robots));
    let other = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([exists(
        vec![other.clone()],
        other.attr("battery").gt(r.attr("battery")),
    )])?;
    assert_eq!(an(query).tolist().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn negation_absorbs_resolution_and_callable_failures() -> Result<()> {
    let robots = [robot("A", "x", 1)];

    // Missing attribute surfaces with an expression path...
    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([r.attr("warp_core").eq(1)])?;
    let err = an(query).tolist().await.unwrap_err();
    match err {
        EqlError::SymbolicResolution { path, .. } => {
            assert!(path.nodes().count() > 1);
        }
        other => panic!("expected resolution error, got {other}"),
    }

    // ...but under NOT it becomes a satisfied negation.
    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([not_(r.attr("warp_core").eq(1))])?;
    assert_eq!(an(query).tolist().await?.len(), 1);

    // Same absorption for user callables.
    let r = variable(&ROBOT, values(&robots));
    let boom = predicate("boom", vec![r.clone()], |_| Err("exploded".to_string()));
    let query = entity(&r).where_([not_(boom)])?;
    assert_eq!(an(query).tolist().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn failing_disjunction_arm_is_forgiven_when_the_other_succeeds() -> Result<()> {
    let robots = [robot("A", "x", 1)];

    let r = variable(&ROBOT, values(&robots));
    let boom = predicate("boom", vec![r.clone()], |_| Err("exploded".to_string()));
    let query = entity(&r).where_([or_([boom.clone(), r.attr("battery").eq(1)])])?;
    assert_eq!(an(query).tolist().await?.len(), 1);

    // With both arms failing, the error surfaces.
    let r = variable(&ROBOT, values(&robots));
    let boom = predicate("boom", vec![r.clone()], |_| Err("exploded".to_string()));
    let query = entity(&r).where_([or_([boom.clone(), boom])])?;
    let err = an(query).tolist().await.unwrap_err();
    assert!(matches!(err, EqlError::UserCallable { .. }));
    Ok(())
}

#[tokio::test]
async fn symbolic_functions_and_length() -> Result<()> {
    let with_parts = robot_with_parts("R", 10, vec![part("a"), part("b")]);
    let bare = robot_with_parts("S", 10, vec![]);

    let r = variable(&ROBOT, values(&[with_parts, bare]));
    let query = entity(&r).where_([length(r.attr("parts")).eq(2)])?;
    let results = an(query).tolist().await?;
    assert_eq!(results.len(), 1);
    assert_eq!(attr_of(&results[0], "name"), Value::Text("R".into()));

    let r = variable(&ROBOT, values(&[robot("T", "x", 7)]));
    let doubled = symbolic_function("doubled", vec![r.attr("battery")], |args| {
        match &args[0] {
            Value::Integer(n) => Ok(Value::Integer(n * 2)),
            _ => Err("expected an integer".to_string()),
        }
    });
    let query = entity(&doubled);
    assert_eq!(an(query).tolist().await?, vec![Value::Integer(14)]);
    Ok(())
}

#[tokio::test]
async fn structural_match_expands_to_a_conjunction() -> Result<()> {
    let robots = [
        robot("R2D2", "Astromech", 100),
        robot("C3PO", "Protocol", 20),
    ];

    let (target, condition) = match_type(&ROBOT)
        .field("kind", "Astromech")
        .field("battery", 100)
        .variable(values(&robots));
    let query = entity(&target).where_([condition])?;
    let results = an(query).tolist().await?;
    assert_eq!(results.len(), 1);
    assert_eq!(attr_of(&results[0], "name"), Value::Text("R2D2".into()));
    Ok(())
}

#[tokio::test]
async fn grouped_extremum_returns_the_achieving_element() -> Result<()> {
    let robots = [
        robot("A", "x", 10),
        robot("B", "x", 30),
        robot("C", "y", 20),
        robot("D", "y", 5),
    ];

    let r = variable(&ROBOT, values(&robots));
    let best: Expr = max_(&r)
        .key(|v| v.attr("battery").map_err(|e| e.to_string()))
        .into();
    let query = entity(&best).grouped_by([r.attr("kind")])?;

    let results = an(query).tolist().await?;
    assert_eq!(results.len(), 2);
    assert_eq!(attr_of(&results[0], "name"), Value::Text("B".into()));
    assert_eq!(attr_of(&results[1], "name"), Value::Text("C".into()));
    Ok(())
}

#[tokio::test]
async fn count_distinct_folds_host_equal_values_once() -> Result<()> {
    let robots = [
        robot("A", "x", 10),
        robot("B", "y", 10),
        robot("C", "z", 20),
    ];

    let r = variable(&ROBOT, values(&robots));
    let distinct_batteries: Expr = count(&r.attr("battery")).distinct().into();
    let query = entity(&distinct_batteries);
    assert_eq!(an(query).tolist().await?, vec![Value::Integer(2)]);
    Ok(())
}

#[tokio::test]
async fn short_circuit_skips_deeper_children() -> Result<()> {
    let robots = [robot("A", "x", 1), robot("B", "y", 2)];
    let calls = Arc::new(AtomicUsize::new(0));

    let r = variable(&ROBOT, values(&robots));
    // has_type over an unrelated type provides one variable and sorts
    // first; it is false for every robot, so the counting predicate
    // (two provided variables) must never run.
    let counting = {
        let calls = calls.clone();
        predicate("counting", vec![r.attr("battery")], move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    };
    let query = entity(&r).where_([has_type(&r, &ITEM), counting])?;
    assert!(an(query).tolist().await?.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn limit_stops_pulling_upstream() -> Result<()> {
    let robots: Vec<_> = (0..100).map(|i| robot(&format!("r{i}"), "x", i)).collect();
    let calls = Arc::new(AtomicUsize::new(0));

    let r = variable(&ROBOT, values(&robots));
    let observed = {
        let calls = calls.clone();
        predicate("observed", vec![r.attr("battery")], move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        })
    };
    let query = entity(&r).where_([observed])?.limit(3)?;
    assert_eq!(an(query).tolist().await?.len(), 3);
    assert!(calls.load(Ordering::SeqCst) <= 4);
    Ok(())
}

#[tokio::test]
async fn next_rules_reason_over_earlier_conclusions() -> Result<()> {
    let c1 = connection(1);
    let c2 = connection(2);

    let c = variable(&CONNECTION, values(&[c1, c2]));
    let views = deduced_variable(&VIEW);
    let seen = deduced_variable(&VIEW);

    let query = entity(&c)
        .add(
            &views,
            inference(&VIEW, view_constructor(&VIEW)).kw("connection", &c),
        )?
        .next_rule(|scope| {
            // Fires only once a view has been deduced; by evaluation
            // order the binding's own conclusion already landed.
            scope.refinement(exists(vec![seen.clone()], has_type(&seen, &VIEW)), |inner| {
                inner.add(
                    &views,
                    inference(&FIXED_VIEW, view_constructor(&FIXED_VIEW)).kw("connection", &c),
                );
            });
        })?;

    let results = an(query).tolist().await?;
    // Per connection: the plain view, then the follow-up conclusion.
    assert_eq!(results.len(), 4);
    assert!(results[0].is_a(&VIEW) && !results[0].is_a(&FIXED_VIEW));
    assert!(results[1].is_a(&FIXED_VIEW));
    Ok(())
}

#[tokio::test]
async fn quantifier_contracts() -> Result<()> {
    let robots = [robot("A", "x", 1), robot("B", "y", 2), robot("C", "z", 3)];

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([r.attr("battery").gt(0)])?;
    let err = eql_query::at_most(2, query).tolist().await.unwrap_err();
    assert!(matches!(err, EqlError::MoreThanOneSolutionFound { expected: 2 }));

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([r.attr("battery").gt(0)])?;
    assert_eq!(eql_query::at_least(2, query).tolist().await?.len(), 3);

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([r.attr("battery").gt(0)])?;
    assert_eq!(eql_query::exactly(3, query).tolist().await?.len(), 3);

    let r = variable(&ROBOT, values(&robots));
    let query = entity(&r).where_([r.attr("battery").gt(100)])?;
    let err = eql_query::exactly(1, query).tolist().await.unwrap_err();
    assert!(matches!(err, EqlError::NoSolutionFound { expected: 1, found: 0 }));
    Ok(())
}

#[tokio::test]
async fn exists_on_a_query_pulls_at_most_one_row() -> Result<()> {
    let robots = [robot("A", "x", 1), robot("B", "y", 2)];

    let r = variable(&ROBOT, values(&robots));
    let mut query = entity(&r).where_([r.attr("battery").gt(1)])?;
    assert!(query.exists().await?);

    let r = variable(&ROBOT, values(&robots));
    let mut query = entity(&r).where_([r.attr("battery").gt(10)])?;
    assert!(!query.exists().await?);
    Ok(())
}
