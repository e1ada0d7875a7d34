//! End-to-end tests against a mocked OpenAI-compatible server.
//!
//! The mock answers chat requests by reading the `[{"id","en"}]` payload from
//! the user message and returning `{"data":[{"id","es"}]}`.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

use miz_translator_core::archive::DICTIONARY_ENTRY;
use miz_translator_core::translate::OutputLayout;
use miz_translator_core::{
    CancelFlag, DictionaryTranslator, LlmClient, LlmOptions, MissionMode, MissionPlan,
    MissionRunner, MissionStatus, TransportMode, TranslationCache, TranslatorConfig,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use zip::write::{SimpleFileOptions, ZipWriter};
use zip::ZipArchive;

const FIXTURE_DICTIONARY: &str = include_str!("fixtures/sample_dictionary.lua");

fn spanish(en: &str) -> String {
    match en {
        "Engage bandit" => "Ataca al bandido".into(),
        "Take off from ⟦B0⟧" => "Despega desde ⟦B0⟧".into(),
        "Join on Enfield 1-1" => "Únete a Enfield 1-1".into(),
        other => format!("ES {other}"),
    }
}

struct EchoTranslator;

impl Respond for EchoTranslator {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let user = body["messages"].as_array().unwrap().last().unwrap()["content"]
            .as_str()
            .unwrap()
            .to_string();
        let items: Vec<Value> = serde_json::from_str(&user).unwrap();
        let data: Vec<Value> = items
            .iter()
            .map(|item| json!({ "id": item["id"], "es": spanish(item["en"].as_str().unwrap()) }))
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": json!({ "data": data }).to_string() } }]
        }))
    }
}

async fn echo_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(EchoTranslator)
        .mount(&server)
        .await;
    server
}

fn client_for(server: &MockServer) -> LlmClient {
    let options = LlmOptions {
        base_url: format!("{}/v1", server.uri()),
        model: "local-model".into(),
        compat: TransportMode::Chat,
        ..LlmOptions::default()
    };
    LlmClient::new(options, Duration::from_secs(10)).unwrap()
}

fn write_mission(path: &Path, dictionary: &str) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default();
    writer.start_file("mission", options).unwrap();
    writer.write_all(b"mission = {}").unwrap();
    writer.start_file(DICTIONARY_ENTRY, options).unwrap();
    writer.write_all(dictionary.as_bytes()).unwrap();
    writer.finish().unwrap();
}

fn read_dictionary(archive: &Path) -> String {
    let mut zip = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut text = String::new();
    zip.by_name(DICTIONARY_ENTRY)
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    text
}

#[tokio::test]
async fn single_entry_scenario() {
    let server = echo_server().await;
    let client = client_for(&server);
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("dictionary");
    fs::write(&input, "dictionary = \n{\n    [\"DictKey_1\"] = \"Engage bandit\",\n}\n").unwrap();

    let config = TranslatorConfig {
        batch_size: 1,
        ..TranslatorConfig::default()
    };
    let layout = OutputLayout::in_dir(dir.path().join("out"));
    let report = DictionaryTranslator::new(&client, config.prepare())
        .translate_file(&input, &layout)
        .await
        .unwrap();

    let translated = fs::read_to_string(&layout.translated).unwrap();
    assert!(translated.contains("[\"DictKey_1\"] = \"Ataca al bandido\""));

    let cache: Value = serde_json::from_str(&fs::read_to_string(&layout.cache).unwrap()).unwrap();
    assert_eq!(cache, json!({ "Engage bandit": "Ataca al bandido" }));
    assert_eq!(report.model_resolved, 1);
    assert!(report.entries_match);
    assert!(layout.placeholders.is_file());
    assert_eq!(fs::read_to_string(&layout.finetune).unwrap().lines().count(), 1);
}

#[tokio::test]
async fn multi_line_values_and_duplicates() {
    let server = echo_server().await;
    let client = client_for(&server);
    let config = TranslatorConfig {
        exclude_prefixes: vec!["DictKey_sortie".into()],
        ..TranslatorConfig::default()
    };
    let mut cache = TranslationCache::new("unused.json");

    let result = DictionaryTranslator::new(&client, config.prepare())
        .translate_text(FIXTURE_DICTIONARY, &mut cache)
        .await;

    assert!(result.text.contains(
        "[\"DictKey_descriptionBriefing_2\"] = \"Despega desde [AIRBASE].\\\nÚnete a Enfield 1-1!\\\n\","
    ));
    assert!(result.text.contains("[\"DictKey_ActionRadioText_3\"] = \"Ataca al bandido\""));
    assert!(result.text.contains("[\"DictKey_sortie_4\"] = \"Operation Fox\""));
    assert!(result.text.contains("[\"DictKey_subtitle_5\"] = \"145.50\""));
    assert!(result.text.ends_with("} -- end of dictionary\n"));

    let report = &result.report;
    assert_eq!(report.total_segments, 6);
    assert_eq!(report.non_translatable, 2);
    assert_eq!(report.unique_sent, 3);
    assert_eq!(report.model_resolved, 4);
    assert_eq!(report.fallbacks, 0);
    assert_eq!(report.entries_before, 5);
    assert!(report.entries_match);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(cache.len(), 3);
}

#[tokio::test]
async fn failing_model_falls_back_to_source() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;
    let client = client_for(&server);
    let config = TranslatorConfig::default();
    let mut cache = TranslationCache::new("unused.json");

    let result = DictionaryTranslator::new(&client, config.prepare())
        .translate_text(FIXTURE_DICTIONARY, &mut cache)
        .await;

    assert_eq!(result.text, FIXTURE_DICTIONARY);
    assert!(result.segments.iter().all(|s| s.translation().is_some()));
    assert_eq!(result.report.fallbacks, 5);
    assert_eq!(result.report.non_translatable, 2);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn missions_translate_repack_and_continue_after_failure() {
    let server = echo_server().await;
    let client = client_for(&server);
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("missions");
    let dest = dir.path().join("translated");
    fs::create_dir_all(&source).unwrap();
    write_mission(&source.join("op_fox.miz"), FIXTURE_DICTIONARY);
    let global = dir.path().join("global").join("translation_cache.json");

    let plan = MissionPlan {
        source_dir: source.clone(),
        dest_dir: dest.clone(),
        missions: vec!["missing.miz".into(), "op_fox.miz".into()],
        mode: MissionMode::All,
    };
    let runner = MissionRunner::new(&client, TranslatorConfig::default().prepare(), CancelFlag::new())
        .with_global_cache(Some(global.clone()));
    let reports = runner.run(&plan).await;

    assert_eq!(reports.len(), 2);
    assert!(reports[0].is_failure());
    assert_eq!(reports[1].status, MissionStatus::Succeeded);
    assert_eq!(reports[1].output.as_deref(), Some(dest.join("op_fox.miz").as_path()));

    let dictionary = read_dictionary(&dest.join("op_fox.miz"));
    assert!(dictionary.contains("\"Ataca al bandido\""));
    assert!(dest.join("op_fox").join("out").join("segments.jsonl").is_file());
    assert_eq!(
        TranslationCache::load(&global).get("Engage bandit"),
        Some("Ataca al bandido")
    );
    // source archive untouched
    assert_eq!(read_dictionary(&source.join("op_fox.miz")), FIXTURE_DICTIONARY);
}

#[tokio::test]
async fn in_place_repack_backs_up_the_original() {
    let server = echo_server().await;
    let client = client_for(&server);
    let dir = TempDir::new().unwrap();
    let source = dir.path().to_path_buf();
    write_mission(&source.join("op_fox.miz"), FIXTURE_DICTIONARY);

    let runner = MissionRunner::new(&client, TranslatorConfig::default().prepare(), CancelFlag::new());
    let translate = MissionPlan {
        source_dir: source.clone(),
        dest_dir: source.clone(),
        missions: vec!["op_fox.miz".into()],
        mode: MissionMode::Translate,
    };
    let reports = runner.run(&translate).await;
    assert_eq!(reports[0].status, MissionStatus::Succeeded);
    assert!(reports[0].output.is_none());

    let repack = MissionPlan {
        mode: MissionMode::Repack,
        ..translate
    };
    let reports = runner.run(&repack).await;
    let backup = reports[0].backup.clone().unwrap();
    assert!(backup.starts_with(source.join("backup")));
    assert_eq!(read_dictionary(&backup), FIXTURE_DICTIONARY);
    assert!(read_dictionary(&source.join("op_fox.miz")).contains("Ataca al bandido"));
}

#[tokio::test]
async fn cancelled_runs_skip_missions() {
    let server = echo_server().await;
    let client = client_for(&server);
    let dir = TempDir::new().unwrap();
    write_mission(&dir.path().join("op_fox.miz"), FIXTURE_DICTIONARY);

    let cancel = CancelFlag::new();
    cancel.cancel();
    let runner = MissionRunner::new(&client, TranslatorConfig::default().prepare(), cancel);
    let reports = runner
        .run(&MissionPlan {
            source_dir: dir.path().to_path_buf(),
            dest_dir: dir.path().join("out"),
            missions: vec!["op_fox.miz".into()],
            mode: MissionMode::All,
        })
        .await;
    assert_eq!(reports[0].status, MissionStatus::Cancelled);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn later_missions_reuse_the_global_cache() {
    let server = echo_server().await;
    let client = client_for(&server);
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("missions");
    fs::create_dir_all(&source).unwrap();
    let dictionary = "dictionary = \n{\n    [\"DictKey_ActionText_1\"] = \"Engage bandit\",\n}\n";
    write_mission(&source.join("alpha.miz"), dictionary);
    write_mission(&source.join("bravo.miz"), dictionary);

    let runner = MissionRunner::new(&client, TranslatorConfig::default().prepare(), CancelFlag::new())
        .with_global_cache(Some(dir.path().join("global.json")));
    let reports = runner
        .run(&MissionPlan {
            source_dir: source,
            dest_dir: dir.path().join("translated"),
            missions: vec!["alpha.miz".into(), "bravo.miz".into()],
            mode: MissionMode::Translate,
        })
        .await;

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    let bravo = reports[1].dictionary.as_ref().unwrap();
    assert_eq!(bravo.cache_hits, 1);
    assert_eq!(bravo.model_resolved, 0);
    let translated = fs::read_to_string(
        dir.path()
            .join("translated")
            .join("bravo")
            .join("out")
            .join("dictionary.translated.lua"),
    )
    .unwrap();
    assert!(translated.contains("\"Ataca al bandido\""));
}
