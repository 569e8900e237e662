//! Planner integration tests.
//!
//! These pin the emitted per-backend SQL for the planner's main shapes:
//! single-table pushdown, co-shard collapse, cross-shard joins with
//! sort-merge keys, left-join residual handling, and the error surface.

use quilt_query::planner::{JoinStrategy, PlanType, SelectPlan};
use quilt_query::{InsertPlan, PlanError};
use quilt_router::{hash_segments, KeyValue, Router, TableConfig};

/// Two co-sharded pairs: `t1`/`t2` share layout on column `a`; `x1`/`x2`
/// shard on `id` but live on disjoint backends, so they can never co-route.
fn fixture() -> Router {
    let mut router = Router::new();
    router.add_table(TableConfig::hash(
        "sbtest",
        "t1",
        "a",
        hash_segments("t1", &["backend0", "backend1"], 4),
    ));
    router.add_table(TableConfig::hash(
        "sbtest",
        "t2",
        "a",
        hash_segments("t2", &["backend0", "backend1"], 4),
    ));
    router.add_table(TableConfig::hash(
        "sbtest",
        "x1",
        "id",
        hash_segments("x1", &["backend0", "backend1"], 4),
    ));
    router.add_table(TableConfig::hash(
        "sbtest",
        "x2",
        "id",
        hash_segments("x2", &["backend2", "backend3"], 4),
    ));
    router.add_table(TableConfig::hash(
        "sbtest",
        "t",
        "id",
        hash_segments("t", &["backend0", "backend1"], 4),
    ));
    router.add_table(TableConfig::global("sbtest", "g", &["backend0", "backend1"]));
    router
}

fn queries(plan: &SelectPlan<'_>) -> Vec<String> {
    plan.query_tuples().into_iter().map(|t| t.query).collect()
}

mod single_table {
    use super::*;

    #[test]
    fn full_scan_fans_out() {
        let router = fixture();
        let plan = SelectPlan::build(&router, "sbtest", "select id from t").unwrap();
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 4);
        assert_eq!(tuples[0].query, "SELECT id FROM sbtest.t_0000 AS t");
        assert_eq!(tuples[0].backend, "backend0");
        assert_eq!(tuples[1].query, "SELECT id FROM sbtest.t_0001 AS t");
        assert_eq!(tuples[1].backend, "backend1");
        assert!(plan.strategy().is_none());
        assert!(plan.children().is_empty());
    }

    #[test]
    fn shard_key_equality_routes_to_one_shard() {
        let router = fixture();
        let plan =
            SelectPlan::build(&router, "sbtest", "select id from t where id = 3").unwrap();
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 1);
        let index = router.get_index("sbtest", "t", &KeyValue::Integer(3)).unwrap();
        assert_eq!(
            tuples[0].query,
            format!("SELECT id FROM sbtest.t_{index:04} AS t WHERE id = 3")
        );
        assert_eq!(tuples[0].backend, format!("backend{}", index % 2));
    }

    #[test]
    fn single_route_pushes_everything_verbatim() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select id from t where id = 3 order by id desc limit 2, 3 for update",
        )
        .unwrap();
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 1);
        assert!(tuples[0].query.ends_with("ORDER BY id DESC LIMIT 2, 3 FOR UPDATE"));
        assert!(plan.children().is_empty());
    }

    #[test]
    fn multi_route_limit_is_rewritten_and_planned() {
        let router = fixture();
        let plan =
            SelectPlan::build(&router, "sbtest", "select id from t limit 2, 3").unwrap();
        for query in queries(&plan) {
            assert!(query.ends_with("LIMIT 5"), "unexpected query: {query}");
        }
        let plans = plan.children().plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan_type(), PlanType::Limit);
    }

    #[test]
    fn multi_route_order_by_gets_a_child_plan() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select id from t order by id desc",
        )
        .unwrap();
        for query in queries(&plan) {
            assert!(query.ends_with("ORDER BY id DESC"));
        }
        let plans = plan.children().plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan_type(), PlanType::OrderBy);
    }

    #[test]
    fn multi_route_aggregate_gets_a_child_plan() {
        let router = fixture();
        let plan = SelectPlan::build(&router, "sbtest", "select sum(id) from t").unwrap();
        assert_eq!(queries(&plan)[0], "SELECT sum(id) FROM sbtest.t_0000 AS t");
        let plans = plan.children().plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan_type(), PlanType::Aggregate);
    }

    #[test]
    fn avg_pushes_sum_and_count_companions() {
        let router = fixture();
        let plan = SelectPlan::build(&router, "sbtest", "select avg(id) from t").unwrap();
        assert_eq!(
            queries(&plan)[0],
            "SELECT avg(id), sum(id), count(id) FROM sbtest.t_0000 AS t"
        );
    }

    #[test]
    fn group_by_promotes_group_tuples() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select id, count(*) from t group by id",
        )
        .unwrap();
        assert_eq!(
            queries(&plan)[0],
            "SELECT id, count(*) FROM sbtest.t_0000 AS t GROUP BY id"
        );
        assert_eq!(plan.children().plans()[0].plan_type(), PlanType::Aggregate);
    }

    #[test]
    fn for_update_is_set_once() {
        let router = fixture();
        let plan =
            SelectPlan::build(&router, "sbtest", "select id from t for update").unwrap();
        for query in queries(&plan) {
            assert_eq!(query.matches("FOR UPDATE").count(), 1);
        }
    }
}

mod collapse {
    use super::*;

    #[test]
    fn comma_join_on_shard_keys_collapses() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select * from t1, t2 where t1.a = t2.a and t1.b = 2",
        )
        .unwrap();
        assert!(plan.strategy().is_none(), "co-sharded join must collapse");
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 4);
        for (i, tuple) in tuples.iter().enumerate() {
            assert_eq!(
                tuple.query,
                format!(
                    "SELECT * FROM sbtest.t1_{i:04} AS t1, sbtest.t2_{i:04} AS t2 \
                     WHERE t1.b = 2 AND t1.a = t2.a"
                )
            );
        }
    }

    #[test]
    fn explicit_join_on_shard_keys_collapses_at_scan() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select t1.a from t1 join t2 on t1.a = t2.a",
        )
        .unwrap();
        assert!(plan.strategy().is_none());
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 4);
        assert_eq!(
            tuples[0].query,
            "SELECT t1.a FROM sbtest.t1_0000 AS t1 JOIN sbtest.t2_0000 AS t2 ON t1.a = t2.a"
        );
    }

    #[test]
    fn join_on_shard_key_with_equality_routes_to_one_shard() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select * from t1 join t2 on t1.a = t2.a where t1.a = 1",
        )
        .unwrap();
        assert!(plan.strategy().is_none());
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 1);
        let index = router.get_index("sbtest", "t1", &KeyValue::Integer(1)).unwrap();
        assert_eq!(
            tuples[0].query,
            format!(
                "SELECT * FROM sbtest.t1_{index:04} AS t1 JOIN sbtest.t2_{index:04} AS t2 \
                 ON t1.a = t2.a WHERE t1.a = 1"
            )
        );
    }

    #[test]
    fn global_table_join_collapses_in_route_calculation() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select t.id from t join g on t.id = g.id",
        )
        .unwrap();
        assert!(plan.strategy().is_none());
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 4);
        assert_eq!(
            tuples[0].query,
            "SELECT t.id FROM sbtest.t_0000 AS t JOIN sbtest.g ON t.id = g.id"
        );
        assert_eq!(tuples[0].backend, "backend0");
    }
}

mod cross_shard_join {
    use super::*;

    #[test]
    fn left_join_on_residuals_split_by_side() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a from x1 left join x2 \
             on x1.id = x2.id and 1 = 1 and x1.c = 1 and x2.b = 'a'",
        )
        .unwrap();
        assert_eq!(plan.strategy(), Some(JoinStrategy::SortMerge));

        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 8);
        // Left subtree first.
        for (i, tuple) in tuples[..4].iter().enumerate() {
            assert_eq!(
                tuple.query,
                format!(
                    "SELECT x1.c = 1 AS tmpc_0, x1.a, x1.id FROM sbtest.x1_{i:04} AS x1 \
                     ORDER BY x1.id ASC"
                )
            );
        }
        for (i, tuple) in tuples[4..].iter().enumerate() {
            assert_eq!(
                tuple.query,
                format!(
                    "SELECT x2.id FROM sbtest.x2_{i:04} AS x2 \
                     WHERE 1 = 1 AND x2.b = 'a' ORDER BY x2.id ASC"
                )
            );
        }

        let explain = plan.explain();
        assert_eq!(explain["plan"]["lefttmpcols"], serde_json::json!([0]));
        assert_eq!(explain["plan"]["cols"], serde_json::json!([-2]));
    }

    #[test]
    fn residual_comparison_projects_both_operands() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a, x2.y from x1 join x2 on x1.id = x2.id where x1.x > x2.y",
        )
        .unwrap();
        assert_eq!(plan.strategy(), Some(JoinStrategy::SortMerge));

        let explain = plan.explain();
        let cmp = &explain["plan"]["cmpfilter"][0];
        assert_eq!(cmp["left"], 2);
        assert_eq!(cmp["right"], 0);
        assert_eq!(cmp["operator"], ">");
        assert_eq!(cmp["exchange"], false);

        let tuples = plan.query_tuples();
        assert_eq!(
            tuples[0].query,
            "SELECT x1.a, x1.id, x1.x AS tmpo_0 FROM sbtest.x1_0000 AS x1 ORDER BY x1.id ASC"
        );
        assert_eq!(
            tuples[4].query,
            "SELECT x2.y, x2.id FROM sbtest.x2_0000 AS x2 ORDER BY x2.id ASC"
        );
    }

    #[test]
    fn exchanged_comparison_swaps_sides() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a from x1 join x2 on x1.id = x2.id where x2.y > x1.x",
        )
        .unwrap();
        let explain = plan.explain();
        assert_eq!(explain["plan"]["cmpfilter"][0]["exchange"], true);
    }

    #[test]
    fn key_filter_restricts_both_sides() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.id, x2.id from x1 join x2 on x1.id = x2.id where x1.id = 1",
        )
        .unwrap();
        let index = router.get_index("sbtest", "x1", &KeyValue::Integer(1)).unwrap();
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 2);
        assert_eq!(
            tuples[0].query,
            format!(
                "SELECT x1.id FROM sbtest.x1_{index:04} AS x1 WHERE x1.id = 1 \
                 ORDER BY x1.id ASC"
            )
        );
        assert_eq!(
            tuples[1].query,
            format!(
                "SELECT x2.id FROM sbtest.x2_{index:04} AS x2 WHERE x2.id = 1 \
                 ORDER BY x2.id ASC"
            )
        );
    }

    #[test]
    fn right_is_null_stays_client_side() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a from x1 left join x2 on x1.id = x2.id where x2.str is null",
        )
        .unwrap();
        let tuples = plan.query_tuples();
        // The null test must not reach any right-side WHERE.
        for tuple in &tuples[4..] {
            assert!(!tuple.query.contains("WHERE"), "pushed null test: {}", tuple.query);
            assert!(tuple.query.contains("x2.str IS NULL AS tmpo_0"));
        }
        let explain = plan.explain();
        assert_eq!(explain["plan"]["righttmpcols"], serde_json::json!([1]));
    }

    #[test]
    fn join_keys_are_ordered_on_both_sides() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a, x2.b from x1 join x2 on x1.id = x2.id",
        )
        .unwrap();
        let tuples = plan.query_tuples();
        for tuple in &tuples[..4] {
            assert!(tuple.query.ends_with("ORDER BY x1.id ASC"));
        }
        for tuple in &tuples[4..] {
            assert!(tuple.query.ends_with("ORDER BY x2.id ASC"));
        }
        // Both join keys are shard keys, so both sides are unique.
        let explain = plan.explain();
        assert_eq!(explain["plan"]["leftunique"], true);
        assert_eq!(explain["plan"]["rightunique"], true);
    }

    #[test]
    fn cartesian_strategy_without_keys() {
        let router = fixture();
        let plan =
            SelectPlan::build(&router, "sbtest", "select x1.a, x2.b from x1, x2").unwrap();
        assert_eq!(plan.strategy(), Some(JoinStrategy::Cartesian));
        assert_eq!(plan.query_tuples().len(), 8);
    }

    #[test]
    fn no_table_filter_is_broadcast() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a, x2.b from x1, x2 where 1 = 1",
        )
        .unwrap();
        for tuple in plan.query_tuples() {
            assert!(tuple.query.contains("WHERE 1 = 1"), "missing filter: {}", tuple.query);
        }
    }

    #[test]
    fn single_table_having_is_pushed_to_its_side() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a, x2.b from x1 join x2 on x1.id = x2.id having x1.a > 1",
        )
        .unwrap();
        let tuples = plan.query_tuples();
        assert!(tuples[0].query.contains("HAVING x1.a > 1"));
        assert!(!tuples[4].query.contains("HAVING"));
    }

    #[test]
    fn join_order_by_builds_a_child_plan() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a, x2.b from x1 join x2 on x1.id = x2.id order by x1.a",
        )
        .unwrap();
        let plans = plan.children().plans();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].plan_type(), PlanType::OrderBy);
    }

    #[test]
    fn group_by_promotes_to_order_by_on_joins() {
        let router = fixture();
        let plan = SelectPlan::build(
            &router,
            "sbtest",
            "select x1.a, x2.b from x1 join x2 on x1.id = x2.id group by x1.a",
        )
        .unwrap();
        let kinds: Vec<PlanType> =
            plan.children().plans().iter().map(|p| p.plan_type()).collect();
        assert_eq!(kinds, vec![PlanType::Aggregate, PlanType::OrderBy]);
    }
}

mod errors {
    use super::*;

    fn build_err(sql: &str) -> PlanError {
        let router = fixture();
        match SelectPlan::build(&router, "sbtest", sql) {
            Err(err) => err,
            Ok(_) => panic!("expected error for: {sql}"),
        }
    }

    #[test]
    fn order_by_must_be_in_select_list() {
        let err = build_err("select a from t order by b");
        assert_eq!(err.to_string(), "unsupported: orderby[b].should.in.select.list");
    }

    #[test]
    fn order_by_unknown_table() {
        let err = build_err("select a from t order by t9.a");
        assert_eq!(
            err.to_string(),
            "unsupported: unknow.table.in.order.by.field[t9.a]"
        );
    }

    #[test]
    fn aggregates_in_cross_shard_join() {
        let err = build_err("select sum(x1.a) from x1 join x2 on x1.id = x2.id");
        assert_eq!(err.to_string(), "unsupported: cross-shard.query.with.aggregates");
    }

    #[test]
    fn unsplittable_clause_in_cross_shard_join() {
        let err = build_err(
            "select x1.a from x1 join x2 on x1.id = x2.id where x1.a + x2.b = 3",
        );
        assert_eq!(
            err.to_string(),
            "unsupported: clause.'x1.a + x2.b = 3'.in.cross-shard.join"
        );
    }

    #[test]
    fn wildcard_in_cross_shard_join() {
        let err = build_err("select * from x1 join x2 on x1.id = x2.id");
        assert_eq!(err.to_string(), "unsupported: '*'.expression.in.cross-shard.query");
    }

    #[test]
    fn cross_shard_having() {
        let err = build_err(
            "select x1.a, x2.b from x1 join x2 on x1.id = x2.id having x1.a > x2.b",
        );
        assert_eq!(
            err.to_string(),
            "unsupported: havings.'x1.a > x2.b'.in.cross-shard.join"
        );
    }

    #[test]
    fn distinct_in_cross_shard_query() {
        let err = build_err("select distinct x1.a from x1 join x2 on x1.id = x2.id");
        assert_eq!(err.to_string(), "unsupported: distinct.in.cross-shard.query");
    }

    #[test]
    fn group_by_must_be_in_select_list() {
        let err = build_err("select id from t group by b");
        assert_eq!(err.to_string(), "unsupported: group.by[b].should.in.select.list");
    }

    #[test]
    fn unknown_table_is_a_routing_error() {
        let err = build_err("select * from nope");
        assert_eq!(err.to_string(), "router: table 'sbtest.nope' not found");
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let err = build_err("select * from t as x, t1 as x");
        assert_eq!(err.to_string(), "unsupported: duplicate.table.alias.'x'");
    }

    #[test]
    fn non_integer_limit_is_rejected() {
        let err = build_err("select x1.a from x1 join x2 on x1.id = x2.id limit 1.5");
        assert_eq!(
            err.to_string(),
            "unsupported: limit.offset.or.counts.should.be.IntVal"
        );
    }
}

mod insert {
    use super::*;

    #[test]
    fn rows_route_by_shard_key() {
        let router = fixture();
        let plan =
            InsertPlan::build(&router, "sbtest", "insert into t (id, b) values (1, 2), (3, 4)")
                .unwrap();
        let i1 = router.get_index("sbtest", "t", &KeyValue::Integer(1)).unwrap();
        let i3 = router.get_index("sbtest", "t", &KeyValue::Integer(3)).unwrap();
        let tuples = plan.query_tuples();
        if i1 == i3 {
            assert_eq!(tuples.len(), 1);
            assert_eq!(
                tuples[0].query,
                format!("INSERT INTO sbtest.t_{i1:04}(id, b) VALUES (1, 2), (3, 4)")
            );
        } else {
            assert_eq!(tuples.len(), 2);
            let total_rows: usize =
                tuples.iter().map(|t| t.query.matches('(').count() - 1).sum();
            assert_eq!(total_rows, 2);
        }
    }

    #[test]
    fn string_and_float_keys_route() {
        let router = fixture();
        for sql in [
            "insert into t (id, b) values ('xx', 1)",
            "insert into t (id, b) values (0.3333, 1)",
        ] {
            let plan = InsertPlan::build(&router, "sbtest", sql).unwrap();
            assert_eq!(plan.query_tuples().len(), 1);
        }
    }

    #[test]
    fn global_table_broadcasts() {
        let router = fixture();
        let plan =
            InsertPlan::build(&router, "sbtest", "insert into g (id) values (1)").unwrap();
        let tuples = plan.query_tuples();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0].query, "INSERT INTO sbtest.g(id) VALUES (1)");
        assert_eq!(tuples[0].backend, "backend0");
        assert_eq!(tuples[1].backend, "backend1");
    }

    #[test]
    fn missing_shard_key_column_is_rejected() {
        let router = fixture();
        let err = InsertPlan::build(&router, "sbtest", "insert into t (b) values (1)")
            .expect_err("shard key is required");
        assert_eq!(
            err.to_string(),
            "unsupported: shardkey[id].missing.in.insert.column.list"
        );
    }

    #[test]
    fn unknown_table_is_rejected() {
        let router = fixture();
        let err = InsertPlan::build(&router, "sbtest", "insert into t6 (id) values (1)")
            .expect_err("unknown table");
        assert_eq!(err.to_string(), "router: table 'sbtest.t6' not found");
    }
}
