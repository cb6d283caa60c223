#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pairprep::adapter::{Adapter, AdapterError, AdapterOutput, Failure, FailureCause, Invocation};
use pairprep::engine::{StagePipeline, Workspace};
use pairprep::workflow::{
    CommandTemplate, FetchConfig, FetchVariant, PipelineConfig, Stage, StageKind, ToolConfig,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

pub fn write_samples(dir: &Path, rows: &[(&str, u64, u64)]) -> PathBuf {
    let mut content = String::from("sample,CID_A,CID_B\n");
    for (key, a, b) in rows {
        content.push_str(&format!("{},{},{}\n", key, a, b));
    }
    let path = dir.join("Mol.csv");
    fs::write(&path, content).expect("Failed to write sample table");
    path
}

/// A small template tree with a nested directory
pub fn write_template_dir(dir: &Path) -> PathBuf {
    let root = dir.join("File");
    fs::create_dir_all(root.join("toppar")).expect("Failed to create template dir");
    fs::write(root.join("md.mdp"), "integrator = md\n").expect("Failed to write template");
    fs::write(root.join("toppar/forcefield.itp"), "; shared parameters\n")
        .expect("Failed to write template");
    root
}

pub const TOPOLOGY_WITH_ATOMTYPES: &str = "[ atomtypes ]\n;name bond_type mass charge ptype sigma epsilon\n c3 c3 0.0 0.0 A 3.39967e-01 4.57730e-01\n\n[ moleculetype ]\n;name nrexcl\n MOA 3\n";

pub const TOPOLOGY_WITHOUT_ATOMTYPES: &str = "[ moleculetype ]\n;name nrexcl\n MOA 3\n";

/// Records every invocation as `stage:MOA` / `stage:sample` strings
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// Adapter that writes its declared outputs, or fails for chosen samples
pub struct FakeAdapter {
    stage: StageKind,
    calls: CallLog,
    fail_keys: Vec<String>,
    content: String,
    panic: bool,
}

impl FakeAdapter {
    pub fn new(stage: StageKind, calls: CallLog) -> Self {
        let content = match stage {
            StageKind::GenerateTopology | StageKind::ExtractParameters => {
                TOPOLOGY_WITH_ATOMTYPES.to_string()
            }
            _ => format!("{} output\n", stage),
        };
        Self {
            stage,
            calls,
            fail_keys: Vec::new(),
            content,
            panic: false,
        }
    }

    pub fn failing_for(mut self, key: &str) -> Self {
        self.fail_keys.push(key.to_string());
        self
    }

    pub fn with_content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic = true;
        self
    }
}

#[async_trait]
impl Adapter for FakeAdapter {
    fn stage(&self) -> StageKind {
        self.stage
    }

    async fn invoke(
        &self,
        workspace: &Workspace,
        invocation: &Invocation<'_>,
    ) -> Result<AdapterOutput, AdapterError> {
        let target = match invocation.molecule {
            Some(m) => m.token().to_string(),
            None => invocation.sample.key.clone(),
        };
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.stage, target));

        if self.panic {
            panic!("fake adapter panicked");
        }
        if self.fail_keys.contains(&invocation.sample.key) {
            return Err(AdapterError::for_stage(
                self.stage,
                Failure::new(FailureCause::ExitStatus(Some(1)), "simulated failure"),
            ));
        }

        let outputs = match invocation.molecule {
            Some(m) => Stage::for_molecule(self.stage, m).outputs,
            None => vec!["deployed.txt".to_string()],
        };
        let mut paths = Vec::new();
        for name in outputs {
            let path = workspace.path(&name);
            if !workspace.is_ready(&name) || self.stage == StageKind::GenerateTopology {
                fs::write(&path, &self.content).unwrap();
            }
            paths.push(path);
        }
        Ok(AdapterOutput::new(paths, "ok"))
    }
}

/// Pipeline of fake adapters for every stage
pub fn fake_pipeline(calls: &CallLog) -> StagePipeline {
    StageKind::ALL
        .into_iter()
        .fold(StagePipeline::new(), |pipeline, kind| {
            pipeline.with_adapter(FakeAdapter::new(kind, calls.clone()))
        })
}

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Minimal HTTP server answering GET requests from a path -> (status, body) table
pub struct TestServer {
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<String>>>,
}

impl TestServer {
    pub async fn start(routes: HashMap<String, (u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test server");
        let addr = listener.local_addr().expect("Failed to read local address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(routes);

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = routes.clone();
                let seen = seen.clone();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                buffer.extend_from_slice(&chunk[..n]);
                                if buffer.windows(4).any(|w| w == b"\r\n\r\n") {
                                    break;
                                }
                            }
                        }
                    }

                    let request = String::from_utf8_lossy(&buffer);
                    let target = request
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("/")
                        .to_string();
                    seen.lock().unwrap().push(target.clone());

                    let (status, body) = routes
                        .get(&target)
                        .cloned()
                        .unwrap_or((404, "Not Found".to_string()));
                    let response = format!(
                        "HTTP/1.1 {} Test\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// 3-D request first, 2-D request as fallback, both against `base_url`
pub fn fetch_config(base_url: &str) -> FetchConfig {
    FetchConfig {
        timeout: 5_000,
        variants: vec![
            FetchVariant {
                name: "3d".to_string(),
                url: format!("{}/cid/${{{{ cid }}}}/SDF?record_type=3d", base_url),
            },
            FetchVariant {
                name: "2d".to_string(),
                url: format!("{}/cid/${{{{ cid }}}}/SDF", base_url),
            },
        ],
    }
}

pub const SDF_BODY: &str = "3715\n  fake\n\n  1  0  0  0  0  0            999 V2000\nM  END\n$$$$\n";

const CONVERT_SCRIPT: &str = r#"printf '@<TRIPOS>MOLECULE\n%s\n@<TRIPOS>ATOM\n      1 C1   0.0000 0.0000 0.0000 c3  1 UNL  0.0000\n@<TRIPOS>BOND\n' "$1" > "$2""#;

const OPTIMIZE_SCRIPT: &str = r#"cp "$1" "$2""#;

fn topology_script(itp: &str) -> String {
    format!(
        r#"mkdir -p "$1.acpype" && echo gro > "$1.acpype/$1_GMX.gro" && printf '{}' > "$1.acpype/$1_GMX.itp""#,
        itp.replace('\n', "\\n")
    )
}

/// Configuration whose external tools are `sh -c` stand-ins
pub fn sh_config(root: &Path, base_url: &str, itp: &str) -> PipelineConfig {
    PipelineConfig {
        workdir: root.join("work"),
        log_dir: root.join("logs"),
        template_dir: root.join("File"),
        fetch: fetch_config(base_url),
        convert: ToolConfig::single(CommandTemplate::new(
            "sh",
            &["-c", CONVERT_SCRIPT, "obabel", "${{ input }}", "${{ output }}"],
            10_000,
        )),
        optimize: ToolConfig::single(CommandTemplate::new(
            "sh",
            &["-c", OPTIMIZE_SCRIPT, "obabel", "${{ input }}", "${{ output }}"],
            10_000,
        )),
        topology: ToolConfig::single(CommandTemplate::new(
            "sh",
            &["-c", &topology_script(itp), "acpype", "${{ basename }}"],
            10_000,
        )),
        ..PipelineConfig::default()
    }
}

/// Routes serving a 3-D structure for every listed compound
pub fn structure_routes(cids: &[u64]) -> HashMap<String, (u16, String)> {
    cids.iter()
        .map(|cid| {
            (
                format!("/cid/{}/SDF?record_type=3d", cid),
                (200, SDF_BODY.to_string()),
            )
        })
        .collect()
}
