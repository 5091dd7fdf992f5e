//! Shared helpers for spec tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use wave_adapters::fake::FakeRunner;
use wave_engine::Engine;
use wave_manifest::{load_manifest, load_pipeline};

pub const MANIFEST: &str = r#"
apiVersion: v1
kind: WaveManifest
metadata: { name: spec-project }
adapters:
  claude: { binary: claude }
personas:
  analyzer:
    adapter: claude
    system_prompt_file: .wave/personas/analyzer.md
  summarizer:
    adapter: claude
    system_prompt_file: .wave/personas/summarizer.md
"#;

/// Write a project tree: manifest, persona prompts, and one pipeline file.
pub fn scaffold(dir: &Path, pipeline_yaml: &str) -> PathBuf {
    let wave = dir.join(".wave");
    std::fs::create_dir_all(wave.join("personas")).unwrap();
    std::fs::create_dir_all(wave.join("pipelines")).unwrap();
    std::fs::write(wave.join("manifest.yaml"), MANIFEST).unwrap();
    std::fs::write(wave.join("personas/analyzer.md"), "# Analyzer").unwrap();
    std::fs::write(wave.join("personas/summarizer.md"), "# Summarizer").unwrap();

    let pipeline_path = wave.join("pipelines/pipeline.yaml");
    std::fs::write(&pipeline_path, pipeline_yaml).unwrap();
    pipeline_path
}

/// Load the scaffolded project into an engine backed by a scripted runner.
pub fn engine_for(dir: &Path, pipeline_yaml: &str, runner: FakeRunner) -> Engine<FakeRunner> {
    let pipeline_path = scaffold(dir, pipeline_yaml);
    let manifest = load_manifest(&dir.join(".wave/manifest.yaml")).unwrap();
    let pipeline = load_pipeline(&pipeline_path).unwrap();
    Engine::new(manifest, vec![pipeline], dir, runner).unwrap()
}

pub fn input(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
