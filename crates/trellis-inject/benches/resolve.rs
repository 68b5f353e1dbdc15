use std::rc::Rc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use trellis_inject::{Arguments, Constructor, InjectMode, Injectable, InjectionRegister, InjectionResult, LocalInjections};

struct Leaf;

impl Injectable for Leaf {
    fn construct(_args: &mut Arguments) -> InjectionResult<Self> {
        Ok(Leaf)
    }
}

struct Middle {
    _left: Rc<Leaf>,
    _right: Rc<Leaf>,
}

impl Injectable for Middle {
    fn parameter_types() -> Vec<Constructor> {
        vec![Constructor::of::<Leaf>(), Constructor::of::<Leaf>()]
    }

    fn construct(args: &mut Arguments) -> InjectionResult<Self> {
        Ok(Middle {
            _left: args.take()?,
            _right: args.take()?,
        })
    }
}

struct Root {
    _middle: Rc<Middle>,
    _leaf: Rc<Leaf>,
}

impl Injectable for Root {
    fn parameter_types() -> Vec<Constructor> {
        vec![Constructor::of::<Middle>(), Constructor::of::<Leaf>()]
    }

    fn construct(args: &mut Arguments) -> InjectionResult<Self> {
        Ok(Root {
            _middle: args.take()?,
            _leaf: args.take()?,
        })
    }
}

fn bench_instanced_graph(c: &mut Criterion) {
    let register = InjectionRegister::new();
    register.register_type::<Leaf>(InjectMode::Instanced);
    register.register_type::<Middle>(InjectMode::Instanced);
    let root = register.register_type::<Root>(InjectMode::Instanced);

    c.bench_function("resolve_instanced_graph", |b| {
        b.iter(|| register.create_object(black_box(&root)).unwrap());
    });
}

fn bench_singleton_cached(c: &mut Criterion) {
    let register = InjectionRegister::new();
    register.register_type::<Leaf>(InjectMode::Instanced);
    register.register_type::<Middle>(InjectMode::Instanced);
    let root = register.register_type::<Root>(InjectMode::Singleton);
    register.create_object(&root).unwrap();

    c.bench_function("resolve_singleton_cached", |b| {
        b.iter(|| register.create_object(black_box(&root)).unwrap());
    });
}

fn bench_forced_with_locals(c: &mut Criterion) {
    let register = InjectionRegister::new();
    register.register_type::<Leaf>(InjectMode::Instanced);
    register.register_type::<Middle>(InjectMode::Instanced);
    let root = register.register_type::<Root>(InjectMode::Singleton);
    let locals = LocalInjections::new().with(Rc::new(Leaf));

    c.bench_function("resolve_forced_with_locals", |b| {
        b.iter(|| {
            register
                .create_object_forced(black_box(&root), true, &locals)
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_instanced_graph,
    bench_singleton_cached,
    bench_forced_with_locals
);
criterion_main!(benches);
