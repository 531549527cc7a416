//! Benchmarks for import resolution.

use circuitflow::engine::Engine;
use circuitflow::resolver::{ProjectFiles, ResolverBridge, StdLib};
use circuitflow::testing::{MockConfig, MockEngine};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn project(depth: usize) -> ProjectFiles {
    let mut files = ProjectFiles::new();
    for i in 0..depth {
        let body = if i + 1 < depth {
            format!("import \"./m{}\"\nfrom \"ecc/babyjubjubParams\" import params;\n// m{i}", i + 1)
        } else {
            format!("// m{i}")
        };
        files.insert(&format!("lib/m{i}.zok"), body);
    }
    files
}

fn resolver_benchmark(c: &mut Criterion) {
    let config = MockConfig::new();
    let bridge = ResolverBridge::new(StdLib::new(config.std_lib.clone()))
        .with_default_extension(Some("zok".to_string()));
    bridge.begin_compile("main.zok", project(8));

    c.bench_function("lookup_project_file", |b| {
        b.iter(|| bridge.lookup(black_box("lib/m3.zok"), black_box("./m4")));
    });

    c.bench_function("lookup_stdlib", |b| {
        b.iter(|| bridge.lookup(black_box("main.zok"), black_box("hashes/sha256/512bit")));
    });

    let mut engine = MockEngine::new(config);
    let compile_bridge = ResolverBridge::new(StdLib::new(engine.std_lib()))
        .with_default_extension(Some("zok".to_string()));
    if engine.initialize(Box::new(compile_bridge.clone())).is_err() {
        return;
    }

    c.bench_function("compile_import_chain_32", |b| {
        b.iter(|| {
            compile_bridge.begin_compile("main.zok", project(32));
            let program = engine.compile(black_box("import \"./lib/m0\""), "main.zok");
            black_box((program, compile_bridge.finish_compile()))
        });
    });
}

criterion_group!(benches, resolver_benchmark);
criterion_main!(benches);
