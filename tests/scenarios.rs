//! End-to-end scenario tests for every operator, run through the `Engine`
//! façade rather than the individual operator states.

use incremental_qe::engine::Engine;
use incremental_qe::error::ProviderError;
use incremental_qe::provider::{EnumerableProvider, StateHandle};
use incremental_qe::value::{Atom, DataType, Field, Schema, Tuple};
use incremental_qe::Delta;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

fn sym(s: &str) -> Atom {
    Atom::symbol(s)
}

fn id(s: &str) -> Atom {
    Atom::id(s)
}

fn int(v: i64) -> Atom {
    Atom::integer(v)
}

fn users_schema() -> Schema {
    Schema::new(
        "Users",
        vec![
            Field {
                name: "uid".into(),
                data_type: DataType::Id,
            },
            Field {
                name: "name".into(),
                data_type: DataType::Symbol,
            },
        ],
    )
    .unwrap()
}

fn orders_schema() -> Schema {
    Schema::new(
        "Orders",
        vec![
            Field {
                name: "oid".into(),
                data_type: DataType::Id,
            },
            Field {
                name: "uid".into(),
                data_type: DataType::Id,
            },
            Field {
                name: "amt".into(),
                data_type: DataType::Integer,
            },
        ],
    )
    .unwrap()
}

/// S1 — Anti-join with support counts: users without any order.
#[test]
fn s1_anti_join_with_support_counts() {
    let engine = Engine::new();
    engine.define_relation(users_schema()).unwrap();
    engine.define_relation(orders_schema()).unwrap();

    let mut builder = engine.build_query();
    let users = builder.scan("Users").unwrap();
    let orders = builder.scan("Orders").unwrap();
    let orders_by_uid = builder.project(orders, &["uid"]).unwrap();
    let without_orders = builder.diff(users, &["uid"], orders_by_uid, &["uid"]).unwrap();
    builder.output("without_orders", without_orders);
    let handle = builder.register("s1").unwrap();

    engine.insert("Users", Tuple::new(vec![id("u1"), sym("Alice")])).unwrap();
    engine.insert("Users", Tuple::new(vec![id("u2"), sym("Bob")])).unwrap();
    engine.insert("Users", Tuple::new(vec![id("u3"), sym("Charlie")])).unwrap();
    engine
        .insert("Orders", Tuple::new(vec![id("o1"), id("u1"), int(100)]))
        .unwrap();
    engine
        .insert("Orders", Tuple::new(vec![id("o2"), id("u2"), int(200)]))
        .unwrap();

    let results = handle.get_results().unwrap();
    assert_eq!(
        results["without_orders"],
        HashSet::from([Tuple::new(vec![id("u3"), sym("Charlie")])])
    );

    engine.delete("Orders", Tuple::new(vec![id("o1"), id("u1"), int(100)])).unwrap();

    let results = handle.get_results().unwrap();
    assert_eq!(
        results["without_orders"],
        HashSet::from([
            Tuple::new(vec![id("u1"), sym("Alice")]),
            Tuple::new(vec![id("u3"), sym("Charlie")]),
        ])
    );
}

/// S2 — Projection deduplication with reference counts.
#[test]
fn s2_projection_deduplication() {
    let engine = Engine::new();
    engine
        .define_relation(
            Schema::new(
                "T",
                vec![
                    Field {
                        name: "a".into(),
                        data_type: DataType::Integer,
                    },
                    Field {
                        name: "b".into(),
                        data_type: DataType::Symbol,
                    },
                ],
            )
            .unwrap(),
        )
        .unwrap();

    let mut builder = engine.build_query();
    let scan = builder.scan("T").unwrap();
    let proj = builder.project(scan, &["a"]).unwrap();
    builder.output("as", proj);
    let handle = builder.register("s2").unwrap();

    engine.insert("T", Tuple::new(vec![int(1), sym("x")])).unwrap();
    engine.insert("T", Tuple::new(vec![int(1), sym("y")])).unwrap();
    engine.insert("T", Tuple::new(vec![int(2), sym("z")])).unwrap();

    let results = handle.get_results().unwrap();
    assert_eq!(
        results["as"],
        HashSet::from([Tuple::new(vec![int(1)]), Tuple::new(vec![int(2)])])
    );

    engine.delete("T", Tuple::new(vec![int(1), sym("x")])).unwrap();
    let results = handle.get_results().unwrap();
    assert!(results["as"].contains(&Tuple::new(vec![int(1)])));

    engine.delete("T", Tuple::new(vec![int(1), sym("y")])).unwrap();
    let results = handle.get_results().unwrap();
    assert!(!results["as"].contains(&Tuple::new(vec![int(1)])));
}

/// S3 — Intra-batch cancellation: a transaction that inserts then removes
/// the same tuple produces no observable change.
#[test]
fn s3_intra_batch_cancellation() {
    let engine = Engine::new();
    engine
        .define_relation(Schema::new("S", vec![Field { name: "v".into(), data_type: DataType::Integer }]).unwrap())
        .unwrap();

    let mut builder = engine.build_query();
    let scan = builder.scan("S").unwrap();
    builder.output("all", scan);
    let handle = builder.register("s3").unwrap();

    let seen = Arc::new(Mutex::new(0usize));
    let seen2 = Arc::clone(&seen);
    handle
        .subscribe("watch", true, false, move |n| {
            *seen2.lock() += 1;
            assert!(n.delta.get("all").map_or(true, |d| !d.is_empty()));
        })
        .unwrap();

    engine.begin_transaction().unwrap();
    engine.insert("S", Tuple::new(vec![int(2)])).unwrap();
    engine.delete("S", Tuple::new(vec![int(2)])).unwrap();
    engine.end_transaction().unwrap();

    assert!(handle.get_results().unwrap()["all"].is_empty());
    assert_eq!(*seen.lock(), 0, "a fully-cancelling batch must not notify");
}

/// S4 — Binary equi-join over VO ⟨y,x,z⟩.
#[test]
fn s4_binary_equi_join() {
    let engine = Engine::new();
    engine
        .define_relation(
            Schema::new(
                "A",
                vec![
                    Field { name: "x".into(), data_type: DataType::Symbol },
                    Field { name: "y".into(), data_type: DataType::Integer },
                ],
            )
            .unwrap(),
        )
        .unwrap();
    engine
        .define_relation(
            Schema::new(
                "B",
                vec![
                    Field { name: "y".into(), data_type: DataType::Integer },
                    Field { name: "z".into(), data_type: DataType::Symbol },
                ],
            )
            .unwrap(),
        )
        .unwrap();

    let mut builder = engine.build_query();
    let a = builder.scan("A").unwrap();
    let b = builder.scan("B").unwrap();
    let joined = builder
        .join(&[(a, "a", &["x", "y"]), (b, "b", &["y", "z"])], &["y", "x", "z"], &["x", "y", "z"])
        .unwrap();
    builder.output("joined", joined);
    let handle = builder.register("s4").unwrap();

    engine.insert("A", Tuple::new(vec![sym("a"), int(1)])).unwrap();
    engine.insert("A", Tuple::new(vec![sym("a"), int(2)])).unwrap();
    engine.insert("A", Tuple::new(vec![sym("b"), int(1)])).unwrap();
    engine.insert("B", Tuple::new(vec![int(1), sym("p")])).unwrap();
    engine.insert("B", Tuple::new(vec![int(1), sym("q")])).unwrap();
    engine.insert("B", Tuple::new(vec![int(3), sym("r")])).unwrap();

    let expected: HashSet<Tuple> = HashSet::from([
        Tuple::new(vec![sym("a"), int(1), sym("p")]),
        Tuple::new(vec![sym("a"), int(1), sym("q")]),
        Tuple::new(vec![sym("b"), int(1), sym("p")]),
        Tuple::new(vec![sym("b"), int(1), sym("q")]),
    ]);
    assert_eq!(handle.get_results().unwrap()["joined"], expected);

    engine.delete("B", Tuple::new(vec![int(1), sym("p")])).unwrap();
    let expected_after: HashSet<Tuple> = HashSet::from([
        Tuple::new(vec![sym("a"), int(1), sym("q")]),
        Tuple::new(vec![sym("b"), int(1), sym("q")]),
    ]);
    assert_eq!(handle.get_results().unwrap()["joined"], expected_after);
}

/// S5 — Triangle query: `E(x,y), E(y,z), E(z,x)` via three labeled atoms
/// over the same underlying Scan.
#[test]
fn s5_triangle_self_join() {
    let engine = Engine::new();
    engine
        .define_relation(
            Schema::new(
                "E",
                vec![
                    Field { name: "from".into(), data_type: DataType::Symbol },
                    Field { name: "to".into(), data_type: DataType::Symbol },
                ],
            )
            .unwrap(),
        )
        .unwrap();

    let mut builder = engine.build_query();
    let e1 = builder.scan("E").unwrap();
    let e2 = builder.scan("E").unwrap();
    let e3 = builder.scan("E").unwrap();
    let xy = builder.rename(e1, &["x", "y"]).unwrap();
    let yz = builder.rename(e2, &["y", "z"]).unwrap();
    let zx = builder.rename(e3, &["z", "x"]).unwrap();
    let triangles = builder
        .join(
            &[(xy, "xy", &["x", "y"]), (yz, "yz", &["y", "z"]), (zx, "zx", &["z", "x"])],
            &["x", "y", "z"],
            &["x", "y", "z"],
        )
        .unwrap();
    builder.output("triangles", triangles);
    let handle = builder.register("s5").unwrap();

    engine.insert("E", Tuple::new(vec![sym("a"), sym("b")])).unwrap();
    engine.insert("E", Tuple::new(vec![sym("b"), sym("c")])).unwrap();
    engine.insert("E", Tuple::new(vec![sym("c"), sym("a")])).unwrap();

    let results = handle.get_results().unwrap();
    assert!(results["triangles"].contains(&Tuple::new(vec![sym("a"), sym("b"), sym("c")])));

    engine.delete("E", Tuple::new(vec![sym("c"), sym("a")])).unwrap();
    let results = handle.get_results().unwrap();
    assert!(results["triangles"].is_empty());
}

struct TestProvider {
    state: Mutex<(HashSet<Tuple>, StateHandle)>,
}

impl EnumerableProvider for TestProvider {
    fn enumerate(&self) -> Result<HashSet<Tuple>, ProviderError> {
        Ok(self.state.lock().0.clone())
    }

    fn delta_since(&self, handle: StateHandle) -> Result<(Delta, StateHandle), ProviderError> {
        let mut state = self.state.lock();
        if handle > 0 {
            return Ok((Delta::empty(), state.1));
        }
        let adds = Tuple::new(vec![id("p3"), int(30)]);
        let removes = Tuple::new(vec![id("p1"), int(10)]);
        state.0.remove(&removes);
        state.0.insert(adds.clone());
        state.1 += 1;
        Ok((Delta::from_sets([adds].into(), [removes].into()), state.1))
    }

    fn current_handle(&self) -> StateHandle {
        self.state.lock().1
    }
}

/// S6 — Enumerable compute cold start plus a `delta_since` propagation.
#[test]
fn s6_enumerable_compute() {
    let engine = Engine::new();
    let provider = Arc::new(TestProvider {
        state: Mutex::new((
            HashSet::from([
                Tuple::new(vec![id("p1"), int(10)]),
                Tuple::new(vec![id("p2"), int(20)]),
            ]),
            0,
        )),
    });
    engine.register_enumerable_provider("prices", provider);

    let schema = Schema::new(
        "prices",
        vec![
            Field { name: "pid".into(), data_type: DataType::Id },
            Field { name: "price".into(), data_type: DataType::Integer },
        ],
    )
    .unwrap();

    let mut builder = engine.build_query();
    let compute = builder.compute_enumerable("prices", schema).unwrap();
    builder.output("prices", compute);
    let handle = builder.register("s6").unwrap();

    let results = handle.get_results().unwrap();
    assert_eq!(
        results["prices"],
        HashSet::from([
            Tuple::new(vec![id("p1"), int(10)]),
            Tuple::new(vec![id("p2"), int(20)]),
        ])
    );

    let seen_delta = Arc::new(Mutex::new(Delta::empty()));
    let seen_delta2 = Arc::clone(&seen_delta);
    handle
        .subscribe("watch", true, false, move |n| {
            if let Some(d) = n.delta.get("prices") {
                seen_delta2.lock().merge_in_place(d);
            }
        })
        .unwrap();

    engine.flush();

    assert_eq!(
        seen_delta.lock().adds,
        [Tuple::new(vec![id("p3"), int(30)])].into()
    );
    assert_eq!(
        seen_delta.lock().removes,
        [Tuple::new(vec![id("p1"), int(10)])].into()
    );

    let results = handle.get_results().unwrap();
    assert_eq!(
        results["prices"],
        HashSet::from([
            Tuple::new(vec![id("p2"), int(20)]),
            Tuple::new(vec![id("p3"), int(30)]),
        ])
    );
}
