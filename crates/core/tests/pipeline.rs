mod common;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use paperplumber_core::{
    load_pdf, read_results, write_results, DriverOptions, Embedder, EmbeddingBackend,
    EmbeddingClient, ExtractError, ExtractionDriver, OpenAiEmbeddingClient, PageScanner,
    PagesSource, PaperOutcome, Result, ValueReader,
};
use secrecy::SecretString;
use tempfile::tempdir;

use common::{stub_server, write_pdf, KeywordModel};

const WATER: &str = "The enthalpy of formation of water is 25.53 kcal/mol";

struct BrokenEmbedder {
    configuration: bool,
    calls: AtomicUsize,
}

impl BrokenEmbedder {
    fn new(configuration: bool) -> Arc<Self> {
        Arc::new(Self {
            configuration,
            calls: AtomicUsize::new(0),
        })
    }
}

impl Embedder for BrokenEmbedder {
    fn embed_batch(&self, _inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.configuration {
            Err(ExtractError::Configuration("embedding credential revoked".into()))
        } else {
            Err(ExtractError::Embedding("upstream timeout".into()))
        }
    }
}

fn hash_embedder() -> Option<Arc<dyn Embedder>> {
    Some(Arc::new(EmbeddingClient::hash()))
}

#[test]
fn loader_returns_one_page_per_physical_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("water.pdf");
    write_pdf(&path, &[WATER, "References"]);

    let pages = load_pdf(&path).unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].number, 1);
    assert_eq!(pages[1].number, 2);
    assert!(pages[0].text.contains("enthalpy"));
    assert!(pages[1].text.contains("References"));
}

#[test]
fn file_and_list_sources_scan_identically() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("water.pdf");
    write_pdf(&path, &[WATER, "References"]);
    let model = KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]);
    let reader = ValueReader::new("enthalpy of formation", model).unwrap();

    let from_file = PageScanner::new(PagesSource::FromFile(path.clone())).unwrap();
    let from_list = PageScanner::from_pages("water.pdf", load_pdf(&path).unwrap());
    assert_eq!(from_file.scan(&reader).unwrap(), vec!["25.53 kcal/mol"]);
    assert_eq!(
        from_file.scan(&reader).unwrap(),
        from_list.scan(&reader).unwrap()
    );
}

#[test]
fn missing_paper_is_recorded_and_others_still_processed() {
    let dir = tempdir().unwrap();
    let water = dir.path().join("water.pdf");
    let chocolate = dir.path().join("chocolate.pdf");
    write_pdf(&water, &[WATER, "Acknowledgements"]);
    write_pdf(&chocolate, &["Chocolate is delicious"]);
    let missing = dir.path().join("missing.pdf");

    let model = KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]);
    let driver =
        ExtractionDriver::new(model, hash_embedder(), DriverOptions::default()).unwrap();
    let results = driver
        .run(
            "enthalpy of formation",
            &[water, missing, chocolate],
        )
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(
        results["water.pdf"],
        PaperOutcome::Values(vec!["25.53 kcal/mol".to_string()])
    );
    assert_eq!(results["chocolate.pdf"], PaperOutcome::Values(vec![]));
    match &results["missing.pdf"] {
        PaperOutcome::Failed { error } => assert!(error.contains("not found")),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn embedding_filter_limits_reader_calls() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("long.pdf");
    write_pdf(
        &path,
        &[
            "Introduction",
            "Methods",
            WATER,
            "Results discussion",
            "Appendix",
        ],
    );

    let filtered = KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]);
    let options = DriverOptions {
        top_k: 2,
        ..DriverOptions::default()
    };
    let driver = ExtractionDriver::new(filtered.clone(), hash_embedder(), options).unwrap();
    let results = driver.run("enthalpy of formation", &[path.clone()]).unwrap();
    assert_eq!(
        results["long.pdf"].values().unwrap(),
        &["25.53 kcal/mol".to_string()]
    );
    assert_eq!(filtered.calls(), 2);

    let unfiltered = KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]);
    let options = DriverOptions {
        use_embedding_filter: false,
        ..DriverOptions::default()
    };
    let driver = ExtractionDriver::new(unfiltered.clone(), None, options).unwrap();
    driver.run("enthalpy of formation", &[path]).unwrap();
    assert_eq!(unfiltered.calls(), 5);
}

#[test]
fn single_page_paper_survives_default_top_k() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("short.pdf");
    write_pdf(&path, &[WATER]);
    let model = KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]);
    let driver =
        ExtractionDriver::new(model, hash_embedder(), DriverOptions::default()).unwrap();
    let results = driver.run("enthalpy of formation", &[path]).unwrap();
    assert!(!results["short.pdf"].is_failed());
}

#[test]
fn conflicting_pages_are_both_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("arc.pdf");
    write_pdf(&path, &["k_f = 240 s-1 at pH 7.5", "k_f = 155 s-1 at 25C"]);
    let model = KeywordModel::new(vec![("240", "240 s-1"), ("155", "155 s-1")]);
    let options = DriverOptions {
        use_embedding_filter: false,
        ..DriverOptions::default()
    };
    let driver = ExtractionDriver::new(model, None, options).unwrap();
    let results = driver.run("folding rate constant", &[path]).unwrap();
    assert_eq!(
        results["arc.pdf"],
        PaperOutcome::Values(vec!["155 s-1".to_string(), "240 s-1".to_string()])
    );
}

#[test]
fn parallel_run_matches_sequential_run() {
    let dir = tempdir().unwrap();
    let mut papers = Vec::new();
    for idx in 0..4 {
        let path = dir.path().join(format!("paper_{idx}.pdf"));
        if idx % 2 == 0 {
            write_pdf(&path, &[WATER, "Other page"]);
        } else {
            write_pdf(&path, &["Nothing to see here"]);
        }
        papers.push(path);
    }
    papers.push(PathBuf::from("/no/such/paper.pdf"));

    let sequential = ExtractionDriver::new(
        KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]),
        hash_embedder(),
        DriverOptions::default(),
    )
    .unwrap()
    .run("enthalpy of formation", &papers)
    .unwrap();
    let parallel = ExtractionDriver::new(
        KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]),
        hash_embedder(),
        DriverOptions {
            jobs: 3,
            ..DriverOptions::default()
        },
    )
    .unwrap()
    .run("enthalpy of formation", &papers)
    .unwrap();
    assert_eq!(sequential.len(), papers.len());
    assert_eq!(sequential, parallel);
}

#[test]
fn embedding_failures_are_per_paper_but_configuration_aborts() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("water.pdf");
    write_pdf(&path, &[WATER]);

    let flaky: Arc<dyn Embedder> = BrokenEmbedder::new(false);
    let driver = ExtractionDriver::new(
        KeywordModel::new(vec![]),
        Some(flaky),
        DriverOptions::default(),
    )
    .unwrap();
    let results = driver.run("enthalpy", &[path.clone()]).unwrap();
    assert!(results["water.pdf"].is_failed());

    let revoked: Arc<dyn Embedder> = BrokenEmbedder::new(true);
    let driver = ExtractionDriver::new(
        KeywordModel::new(vec![]),
        Some(revoked),
        DriverOptions::default(),
    )
    .unwrap();
    let err = driver.run("enthalpy", &[path]).unwrap_err();
    assert!(err.is_configuration());
}

#[test]
fn results_file_roundtrips() {
    let dir = tempdir().unwrap();
    let water = dir.path().join("water.pdf");
    write_pdf(&water, &[WATER]);
    let driver = ExtractionDriver::new(
        KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]),
        hash_embedder(),
        DriverOptions::default(),
    )
    .unwrap();
    let results = driver
        .run("enthalpy of formation", &[water, dir.path().join("gone.pdf")])
        .unwrap();

    let output = dir.path().join("out/output.json");
    write_results(&output, &results).unwrap();
    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(raw["water.pdf"], serde_json::json!(["25.53 kcal/mol"]));
    assert!(raw["gone.pdf"]["error"].is_string());
    assert_eq!(read_results(&output).unwrap(), results);
}

fn five_papers(dir: &std::path::Path) -> Vec<PathBuf> {
    (0..5)
        .map(|idx| {
            let path = dir.join(format!("paper_{idx}.pdf"));
            write_pdf(&path, &[WATER, "Discussion"]);
            path
        })
        .collect()
}

#[test]
fn configuration_error_stops_before_the_next_paper() {
    let dir = tempdir().unwrap();
    let papers = five_papers(dir.path());

    let revoked = BrokenEmbedder::new(true);
    let model = KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]);
    let driver =
        ExtractionDriver::new(model.clone(), Some(revoked.clone()), DriverOptions::default())
            .unwrap();
    let err = driver.run("enthalpy", &papers).unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(revoked.calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.calls(), 0);

    let revoked = BrokenEmbedder::new(true);
    let driver = ExtractionDriver::new(
        KeywordModel::new(vec![]),
        Some(revoked.clone()),
        DriverOptions {
            jobs: 2,
            ..DriverOptions::default()
        },
    )
    .unwrap();
    assert!(driver.run("enthalpy", &papers).unwrap_err().is_configuration());
}

#[test]
fn rejected_embedding_credential_aborts_the_run() {
    let dir = tempdir().unwrap();
    let papers = five_papers(dir.path());
    let base_url = stub_server(
        "401 Unauthorized",
        r#"{"error":{"message":"Incorrect API key provided"}}"#,
        papers.len(),
    );
    let client = OpenAiEmbeddingClient::new(
        "text-embedding-3-small",
        Some(SecretString::new("sk-revoked".to_string())),
    )
    .unwrap()
    .with_base_url(&base_url);
    let embedder: Arc<dyn Embedder> =
        Arc::new(EmbeddingClient::new(EmbeddingBackend::OpenAi(client)));
    let driver = ExtractionDriver::new(
        KeywordModel::new(vec![]),
        Some(embedder),
        DriverOptions::default(),
    )
    .unwrap();
    let err = driver.run("enthalpy", &papers).unwrap_err();
    assert!(err.is_configuration(), "{err}");
}

#[test]
fn repeated_path_is_read_once() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("water.pdf");
    write_pdf(&path, &[WATER, "Discussion"]);
    let model = KeywordModel::new(vec![("enthalpy", "25.53 kcal/mol")]);
    let options = DriverOptions {
        use_embedding_filter: false,
        ..DriverOptions::default()
    };
    let driver = ExtractionDriver::new(model.clone(), None, options).unwrap();
    let results = driver
        .run("enthalpy of formation", &[path.clone(), path])
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(model.calls(), 2);
}
