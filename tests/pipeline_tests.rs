mod common;

use common::advisors::{FailingAdvisor, ScriptedAdvisor};
use common::projects;
use common::stores::FlakyStore;
use forgekit::advisor::{AdvisorClient, SuggestionKind};
use forgekit::deploy::write_workspace;
use forgekit::events::{self, EventKind};
use forgekit::generator::{
    BundleStatus, FileOrigin, GenerationError, Generator, GeneratorOptions, LogStatus, Phase,
};
use forgekit::store::{BundleStore, FsBundleStore, InMemoryBundleStore};
use forgekit::templates::TemplateEngine;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn generator(engine: TemplateEngine, advisor: AdvisorClient, store: Arc<dyn BundleStore>) -> Generator {
    Generator::new(
        Arc::new(engine),
        Arc::new(advisor),
        store,
        GeneratorOptions::default(),
    )
}

#[tokio::test]
async fn test_inventory_backend_only_with_docker() {
    let project = projects::inventory(false, true);
    let gen = generator(
        TemplateEngine::builtin(),
        AdvisorClient::disabled(),
        Arc::new(InMemoryBundleStore::new()),
    );
    let (tx, mut rx) = events::channel();

    let bundle = gen.generate(&project, &tx).await.unwrap();

    assert_eq!(bundle.status, BundleStatus::Complete);
    assert_eq!(
        bundle.completed_phases(),
        vec![Phase::Scaffold, Phase::Models, Phase::Api, Phase::DeploymentManifest]
    );
    for path in [
        "src/models/Product.js",
        "src/routes/productRoutes.js",
        "src/controllers/productController.js",
        "Dockerfile",
        "package.json",
        "src/index.js",
    ] {
        assert!(bundle.file(path).is_some(), "missing {path}");
    }
    assert!(bundle.files.iter().all(|f| !f.path.starts_with("client/")));
    assert!(bundle.digest.is_some());
    assert_eq!(bundle.advisor_calls, 0);

    let events = rx.drain();
    let phases: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Phase)
        .map(|e| e.data["phase"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(phases, vec!["scaffold", "models", "api", "deployment-manifest"]);
    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.data["version"], 1);
}

#[tokio::test]
async fn test_every_render_failing_still_completes() {
    let project = projects::inventory(true, true);
    let gen = generator(
        TemplateEngine::empty(),
        AdvisorClient::disabled(),
        Arc::new(InMemoryBundleStore::new()),
    );

    let bundle = gen.generate(&project, &events::EventSender::discard()).await.unwrap();

    assert!(bundle.is_complete());
    for (module, entity) in project.entities() {
        let camel = {
            let mut chars = entity.name.chars();
            let first = chars.next().unwrap().to_ascii_lowercase();
            format!("{first}{}", chars.as_str())
        };
        assert!(bundle.file(&format!("src/models/{}.js", entity.name)).is_some(), "{}", module.id);
        assert!(bundle.file(&format!("src/routes/{camel}Routes.js")).is_some());
        assert!(bundle.file(&format!("src/controllers/{camel}Controller.js")).is_some());
    }
    assert!(bundle.file("client/src/App.jsx").is_some());
    assert!(bundle
        .log
        .iter()
        .any(|entry| entry.status == LogStatus::Fallback));
    let package: serde_json::Value =
        serde_json::from_str(&bundle.file("package.json").unwrap().content).unwrap();
    assert!(package["dependencies"]["express"].is_string());
}

#[tokio::test]
async fn test_failing_advisor_falls_back_to_defaults() {
    let project = projects::inventory(false, false);
    let failing = Arc::new(FailingAdvisor::default());
    let advisor = AdvisorClient::new(Arc::clone(&failing) as _, Duration::from_secs(1));
    let gen = generator(TemplateEngine::builtin(), advisor, Arc::new(InMemoryBundleStore::new()));

    let bundle = gen.generate(&project, &events::EventSender::discard()).await.unwrap();

    assert_eq!(bundle.status, BundleStatus::Complete);
    let handlers = bundle.file("src/controllers/productController.js").unwrap();
    assert_eq!(handlers.origin, FileOrigin::Template);
    for op in ["list", "getById", "create", "update", "remove"] {
        assert!(handlers.content.contains(&format!("exports.{op}")), "missing {op}");
    }
    let advisor_failures = bundle
        .log
        .iter()
        .filter(|entry| entry.status == LogStatus::AdvisorFallback)
        .count();
    assert!(advisor_failures >= 2);
    assert!(bundle.advisor_calls >= 2);
    assert_eq!(failing.calls.load(Ordering::SeqCst) as u32, bundle.advisor_calls);
}

#[tokio::test]
async fn test_advisor_endpoints_make_hybrid_handlers() {
    let project = projects::custom("helpdesk");
    let advisor = AdvisorClient::new(
        Arc::new(ScriptedAdvisor {
            answers: vec![(
                SuggestionKind::Endpoints,
                json!({ "endpoints": [{
                    "name": "escalate",
                    "method": "POST",
                    "path": "/:id/escalate",
                    "body": "res.json({ escalated: true });"
                }]}),
            )],
        }),
        Duration::from_secs(1),
    );
    let gen = generator(TemplateEngine::builtin(), advisor, Arc::new(InMemoryBundleStore::new()));

    let bundle = gen.generate(&project, &events::EventSender::discard()).await.unwrap();

    let handlers = bundle.file("src/controllers/ticketController.js").unwrap();
    assert_eq!(handlers.origin, FileOrigin::Hybrid);
    assert!(handlers.content.contains("exports.escalate"));
    assert!(handlers.content.contains("escalated: true"));
    assert!(handlers.content.contains("exports.list"));
}

#[tokio::test]
async fn test_regeneration_keeps_prior_version_intact() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn BundleStore> = Arc::new(FsBundleStore::new(dir.path()));
    let project = projects::custom("helpdesk");
    let gen = generator(TemplateEngine::builtin(), AdvisorClient::disabled(), Arc::clone(&store));

    let first = gen.generate(&project, &events::EventSender::discard()).await.unwrap();
    let second = gen.generate(&project, &events::EventSender::discard()).await.unwrap();

    assert_eq!(second.version, first.version + 1);
    assert_eq!(first.digest, second.digest);
    let stored = store.get(&project.id, first.version).await.unwrap().unwrap();
    assert_eq!(stored.files, first.files);
    let latest = store.latest_complete(&project.id).await.unwrap().unwrap();
    assert_eq!(latest.version, second.version);
}

#[tokio::test]
async fn test_store_failure_marks_bundle_error() {
    let store = Arc::new(FlakyStore::failing_after(1));
    let project = projects::custom("helpdesk");
    let gen = generator(
        TemplateEngine::builtin(),
        AdvisorClient::disabled(),
        Arc::clone(&store) as Arc<dyn BundleStore>,
    );
    let (tx, mut rx) = events::channel();

    let err = gen.generate(&project, &tx).await.unwrap_err();

    assert!(matches!(err, GenerationError::Store(_)));
    let stored = store.inner.get(&project.id, 1).await.unwrap().unwrap();
    assert_eq!(stored.status, BundleStatus::Error);
    assert!(stored.error.as_deref().unwrap().contains("disk full"));
    assert!(store.latest_complete(&project.id).await.unwrap().is_none());
    let last = rx.drain().pop().unwrap();
    assert_eq!(last.kind, EventKind::Error);
    assert_eq!(last.data["phase"], "models");
}

#[tokio::test]
async fn test_unavailable_store_reports_error_event() {
    let store = Arc::new(FlakyStore::unavailable());
    let project = projects::custom("helpdesk");
    let gen = generator(
        TemplateEngine::builtin(),
        AdvisorClient::disabled(),
        Arc::clone(&store) as Arc<dyn BundleStore>,
    );
    let (tx, mut rx) = events::channel();

    let err = gen.generate(&project, &tx).await.unwrap_err();

    assert!(matches!(err, GenerationError::Store(_)));
    let events = rx.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Error);
    assert!(events[0].data["message"].as_str().unwrap().contains("read-only filesystem"));
    assert!(store.inner.list(&project.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bundle_materializes_to_disk() {
    let project = projects::inventory(true, true);
    let gen = generator(
        TemplateEngine::builtin(),
        AdvisorClient::disabled(),
        Arc::new(InMemoryBundleStore::new()),
    );
    let bundle = gen.generate(&project, &events::EventSender::discard()).await.unwrap();

    let out = tempfile::tempdir().unwrap();
    let dir = write_workspace(out.path(), &project.id, &bundle).await.unwrap();
    for file in &bundle.files {
        let on_disk = std::fs::read_to_string(dir.join(&file.path)).unwrap();
        assert_eq!(on_disk, file.content, "{}", file.path);
    }
}
