use criterion::{black_box, criterion_group, criterion_main, Criterion};
use remend::locate::find_method_window;

fn method_source(i: usize, indent: &str) -> String {
    format!(
        "{indent}public int compute{i}(int value) {{\n\
         {indent}    int total = value + {i};\n\
         {indent}    if (total > {limit}) {{\n\
         {indent}        total -= {i};\n\
         {indent}    }}\n\
         {indent}    return total;\n\
         {indent}}}\n",
        limit = i * 3,
    )
}

fn synthetic_source(method_count: usize) -> String {
    let mut source = String::from("package com.example.bench;\n\npublic class Synthetic {\n");
    for i in 0..method_count {
        source.push('\n');
        source.push_str(&method_source(i, "    "));
    }
    source.push_str("}\n");
    source
}

fn bench_find_method_window(c: &mut Criterion) {
    let source = synthetic_source(400);

    let near_end = method_source(398, "    ");
    c.bench_function("locate_hit_near_end", |b| {
        b.iter(|| black_box(find_method_window(black_box(&source), black_box(&near_end))))
    });

    // Same method, different indentation; matching is on trimmed lines.
    let reindented = method_source(398, "\t\t");
    c.bench_function("locate_hit_reindented", |b| {
        b.iter(|| black_box(find_method_window(black_box(&source), black_box(&reindented))))
    });

    let miss = method_source(4000, "    ");
    c.bench_function("locate_miss", |b| {
        b.iter(|| black_box(find_method_window(black_box(&source), black_box(&miss))))
    });
}

criterion_group!(locate, bench_find_method_window);
criterion_main!(locate);
