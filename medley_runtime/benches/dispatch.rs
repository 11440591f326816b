//! Dispatch fast-path benchmarks.
//!
//! Measures the per-call cost of the resolved dispatch paths against a
//! native trait-object call, which is the latency budget open methods are
//! specified to stay close to.
//!
//! # Benchmark Categories
//!
//! 1. **1-virtual**: deallocator-slot mtbl, one slot load
//! 2. **1-virtual, hash**: perfect-hash mtbl resolution
//! 3. **2-virtual**: stride accumulation through the dispatch tensor
//! 4. **Baseline**: an ordinary `dyn` trait call for comparison

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use medley_core::class::{ClassDescriptor, PolyObject};
use medley_core::method::{MethodInfo, MtblStrategy, NextCell, RawFn, SpecInfo};
use medley_runtime::{registry, resolve, resolve1, update};
use std::sync::OnceLock;

// =============================================================================
// Fixture
// =============================================================================

static ANIMAL: ClassDescriptor = ClassDescriptor::class("Animal", &[]);
static DOG: ClassDescriptor = ClassDescriptor::class("Dog", &[&ANIMAL]);
static PITBULL: ClassDescriptor = ClassDescriptor::class("Pitbull", &[&DOG]);
static CAT: ClassDescriptor = ClassDescriptor::class("Cat", &[&ANIMAL]);

fn bark(_: &dyn PolyObject) -> &'static str {
    "bark"
}
fn meow(_: &dyn PolyObject) -> &'static str {
    "meow"
}
fn greet(_: &dyn PolyObject, _: &dyn PolyObject) -> &'static str {
    "hello"
}
fn never1(_: &dyn PolyObject) -> &'static str {
    unreachable!()
}
fn never2(_: &dyn PolyObject, _: &dyn PolyObject) -> &'static str {
    unreachable!()
}

struct Methods {
    kick: &'static MethodInfo,
    kick_hashed: &'static MethodInfo,
    meet: &'static MethodInfo,
}

fn leak_spec(
    method: &'static MethodInfo,
    vp: Vec<&'static ClassDescriptor>,
    pf: RawFn,
) -> &'static SpecInfo {
    let next: &'static NextCell = Box::leak(Box::new(NextCell::new()));
    Box::leak(Box::new(SpecInfo::new(method, vp, pf, next)))
}

/// Register the lattice and methods once, then build the tables.
fn methods() -> &'static Methods {
    static METHODS: OnceLock<Methods> = OnceLock::new();
    METHODS.get_or_init(|| {
        let e1 = |f: fn(&dyn PolyObject) -> &'static str| f as RawFn;
        let e2 = |f: fn(&dyn PolyObject, &dyn PolyObject) -> &'static str| f as RawFn;

        let kick: &'static MethodInfo = Box::leak(Box::new(MethodInfo::new(
            "kick",
            vec![&ANIMAL],
            e1(never1),
            e1(never1),
            MtblStrategy::Deallocator,
        )));
        let kick_hashed: &'static MethodInfo = Box::leak(Box::new(MethodInfo::new(
            "kick_hashed",
            vec![&ANIMAL],
            e1(never1),
            e1(never1),
            MtblStrategy::Hash,
        )));
        let meet: &'static MethodInfo = Box::leak(Box::new(MethodInfo::new(
            "meet",
            vec![&ANIMAL, &ANIMAL],
            e2(never2),
            e2(never2),
            MtblStrategy::Deallocator,
        )));

        for class in [&ANIMAL, &DOG, &PITBULL, &CAT] {
            registry().register_class(class);
        }
        for method in [kick, kick_hashed, meet] {
            registry().register_method(method);
        }
        registry().register_spec(leak_spec(kick, vec![&DOG], e1(bark)));
        registry().register_spec(leak_spec(kick, vec![&CAT], e1(meow)));
        registry().register_spec(leak_spec(kick_hashed, vec![&DOG], e1(bark)));
        registry().register_spec(leak_spec(kick_hashed, vec![&CAT], e1(meow)));
        registry().register_spec(leak_spec(meet, vec![&ANIMAL, &ANIMAL], e2(greet)));
        update().expect("table build");

        Methods {
            kick,
            kick_hashed,
            meet,
        }
    })
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let methods = methods();
    let mut group = c.benchmark_group("dispatch");

    group.bench_function("resolve1_deallocator", |b| {
        b.iter(|| unsafe { black_box(resolve1(methods.kick, black_box(&PITBULL))) })
    });

    group.bench_function("resolve1_hash", |b| {
        b.iter(|| unsafe { black_box(resolve1(methods.kick_hashed, black_box(&PITBULL))) })
    });

    group.bench_function("resolve_two_virtual", |b| {
        b.iter(|| unsafe {
            black_box(resolve(methods.meet, black_box(&[&PITBULL, &CAT])))
        })
    });

    struct Pup;
    impl PolyObject for Pup {
        fn class_descriptor(&self) -> &'static ClassDescriptor {
            &PITBULL
        }
    }
    let pup = Pup;
    group.bench_function("resolve1_call_through", |b| {
        b.iter(|| {
            let pf = unsafe { resolve1(methods.kick, pup.class_descriptor()) };
            let f: fn(&dyn PolyObject) -> &'static str = unsafe { std::mem::transmute(pf) };
            black_box(f(black_box(&pup)))
        })
    });

    group.finish();
}

fn bench_baseline(c: &mut Criterion) {
    trait Speak {
        fn speak(&self) -> &'static str;
    }
    struct Pup;
    impl Speak for Pup {
        fn speak(&self) -> &'static str {
            "bark"
        }
    }

    let pup = Pup;
    let dyn_ref: &dyn Speak = black_box(&pup);
    c.bench_function("baseline_virtual_call", |b| {
        b.iter(|| black_box(dyn_ref.speak()))
    });
}

criterion_group!(benches, bench_dispatch, bench_baseline);
criterion_main!(benches);
