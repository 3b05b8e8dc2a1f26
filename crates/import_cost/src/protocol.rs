//! Line-delimited JSON messages between the pool and its workers.
//!
//! Each request is answered by exactly one response carrying the same `id`,
//! in order. A worker serves one request at a time.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use import_cost_bundle::calc_size;
use import_cost_core::{CostError, ImportDescriptor, SizeResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: u64,
    pub import: ImportDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub id: u64,
    pub result: Result<SizeResult, CostError>,
}

/// Worker loop: answer size requests from `input` until it closes.
pub async fn serve<R, W>(input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    info!("Worker {} ready", std::process::id());
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let request: WorkerRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("Ignoring malformed request: {}", e);
                continue;
            }
        };
        debug!("Request {}: {}", request.id, request.import.specifier);

        let import = request.import;
        let result = tokio::task::spawn_blocking(move || calc_size(&import))
            .await
            .unwrap_or_else(|e| Err(CostError::worker(e)));
        let response = WorkerResponse { id: request.id, result };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        output.write_all(payload.as_bytes()).await.context("Failed to write response")?;
        output.flush().await.context("Failed to flush response")?;
    }
    info!("Worker {} input closed", std::process::id());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, path::PathBuf};
    use tempfile::TempDir;

    fn request(id: u64, file: PathBuf, specifier: &str) -> WorkerRequest {
        WorkerRequest {
            id,
            import: ImportDescriptor {
                file,
                specifier: specifier.to_string(),
                line: 1,
                entry_source: format!("import * as tmp from '{specifier}';\nconsole.log(tmp);"),
            },
        }
    }

    #[test]
    fn test_response_wire_format() {
        let ok = WorkerResponse { id: 3, result: Ok(SizeResult { size: 10, gzip: 5 }) };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"id": 3, "result": {"Ok": {"size": 10, "gzip": 5}}})
        );

        let err = WorkerResponse { id: 4, result: Err(CostError::Timeout { limit_ms: 9 }) };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["result"]["Err"]["type"], "TimeoutError");
    }

    #[tokio::test]
    async fn test_serve_answers_each_request() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("package.json"), "{}").unwrap();
        fs::create_dir_all(root.join("node_modules/tiny")).unwrap();
        fs::write(root.join("node_modules/tiny/index.js"), "module.exports = 42;").unwrap();
        let file = root.join("index.js");

        let mut input = String::new();
        input.push_str(&serde_json::to_string(&request(1, file.clone(), "tiny")).unwrap());
        input.push_str("\nnot json\n\n");
        input.push_str(&serde_json::to_string(&request(2, file, "missing")).unwrap());
        input.push('\n');

        let mut output: Vec<u8> = Vec::new();
        serve(input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<WorkerResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].id, 1);
        assert!(responses[0].result.as_ref().unwrap().size > 0);
        assert_eq!(responses[1].id, 2);
        assert_eq!(responses[1].result.as_ref().unwrap_err().kind(), "VersionResolutionError");
    }
}
