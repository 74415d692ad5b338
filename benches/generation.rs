use criterion::{black_box, criterion_group, criterion_main, Criterion};
use forgekit::advisor::AdvisorClient;
use forgekit::events::EventSender;
use forgekit::generator::{Generator, GeneratorOptions};
use forgekit::spec::{normalize, Industry, ModuleCatalog, ModuleSpec, ProjectSpec};
use forgekit::store::InMemoryBundleStore;
use forgekit::templates::TemplateEngine;
use forgekit::ProjectId;
use std::sync::Arc;

/// Every ERP catalog module with its default entities.
fn erp_project() -> ProjectSpec {
    let catalog = ModuleCatalog::builtin();
    let project = catalog
        .modules_for_industry(Industry::Erp)
        .into_iter()
        .fold(
            ProjectSpec::new(ProjectId::new("bench-erp").unwrap(), "Bench ERP"),
            |project, module| project.with_module(ModuleSpec::new(module.id.clone())),
        );
    normalize(project, catalog).unwrap()
}

fn bench_normalize(c: &mut Criterion) {
    c.bench_function("normalize_erp", |b| {
        b.iter(|| {
            let project = ModuleCatalog::builtin()
                .modules_for_industry(Industry::Erp)
                .into_iter()
                .fold(
                    ProjectSpec::new(ProjectId::new("bench-erp").unwrap(), "Bench ERP"),
                    |project, module| project.with_module(ModuleSpec::new(module.id.clone())),
                );
            black_box(normalize(project, ModuleCatalog::builtin()).unwrap())
        })
    });
}

fn bench_generate(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let project = erp_project();
    let engine = Arc::new(TemplateEngine::builtin());
    let advisor = Arc::new(AdvisorClient::disabled());

    c.bench_function("generate_erp_bundle", |b| {
        b.iter(|| {
            // Fresh store per run so every iteration generates version 1.
            let generator = Generator::new(
                Arc::clone(&engine),
                Arc::clone(&advisor),
                Arc::new(InMemoryBundleStore::new()),
                GeneratorOptions::default(),
            );
            let bundle = rt
                .block_on(generator.generate(&project, &EventSender::discard()))
                .unwrap();
            black_box(bundle.files.len())
        })
    });
}

criterion_group!(benches, bench_normalize, bench_generate);
criterion_main!(benches);
