//! Artifact packaging and streaming upload.
//!
//! Selected paths are walked into a tar stream wrapped in gzip. Packaging
//! runs on a blocking task that writes into a chunk channel while reqwest
//! streams those chunks as the upload body, so large artifacts never reside
//! fully in memory.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, WorkerError};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const BACKEND_APP_TYPES: [&str; 3] = ["express", "hono", "elysia"];

pub fn is_backend_framework(app_type: &str) -> bool {
    BACKEND_APP_TYPES.contains(&app_type)
}

/// Package the selected paths and stream them to the deploy uplink.
pub async fn stream_artifact(
    client: &reqwest::Client,
    deploy_engine_url: &str,
    build_id: &str,
    project_dir: &Path,
    app_type: &str,
) -> Result<()> {
    let paths = collect_artifact_paths(project_dir, app_type)?;
    if paths.is_empty() {
        return Err(WorkerError::NoOutput);
    }

    info!("Packaging artifact paths: {:?}", paths);

    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(32);
    let producer_dir = project_dir.to_path_buf();
    let producer = tokio::task::spawn_blocking(move || {
        write_archive(ChannelWriter { tx }, &producer_dir, &paths)
    });

    let url = format!("{deploy_engine_url}/artifacts/upload?buildId={build_id}");
    let body = reqwest::Body::wrap_stream(ReceiverStream::new(rx));

    let response = client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/gzip")
        .timeout(UPLOAD_TIMEOUT)
        .body(body)
        .send()
        .await
        .map_err(|e| WorkerError::ArtifactUpload(e.to_string()))?;

    match producer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(WorkerError::ArtifactUpload(format!("packaging failed: {e}")));
        }
        Err(e) => {
            return Err(WorkerError::ArtifactUpload(format!(
                "packaging task aborted: {e}"
            )));
        }
    }

    if !response.status().is_success() {
        return Err(WorkerError::ArtifactUpload(format!(
            "upload returned {}",
            response.status()
        )));
    }

    info!("Artifact upload completed for build {}", build_id);
    Ok(())
}

/// Decide which paths (relative to `project_dir`) belong in the artifact.
///
/// Backend frameworks ship their full source tree minus `node_modules` and
/// `.git` (dependencies are installed on the deploy host). Frontend
/// frameworks ship their build output plus manifest and lockfiles.
pub fn collect_artifact_paths(project_dir: &Path, app_type: &str) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    if is_backend_framework(app_type) {
        for entry in std::fs::read_dir(project_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name != "node_modules" && name != ".git" {
                paths.push(PathBuf::from(name));
            }
        }
        paths.sort();
        return Ok(paths);
    }

    for lockfile in ["package.json", "bun.lockb", "package-lock.json"] {
        if project_dir.join(lockfile).exists() {
            paths.push(PathBuf::from(lockfile));
        }
    }

    let candidates: &[&str] = match app_type {
        "nextjs" => &[
            ".next",
            "public",
            "package.json",
            "next.config.mjs",
            "next.config.js",
            "next.config.ts",
            "out",
        ],
        "vite" => &["dist"],
        _ => &["dist", "build", "out"],
    };

    for candidate in candidates {
        let candidate = PathBuf::from(candidate);
        if project_dir.join(&candidate).exists() && !paths.contains(&candidate) {
            paths.push(candidate);
        }
    }

    Ok(paths)
}

/// Write a gzipped tar of the given paths into `writer`. Entry names are
/// relative to `project_dir`; `node_modules` and `.git` are pruned at any
/// depth.
pub fn write_archive<W: Write>(
    writer: W,
    project_dir: &Path,
    paths: &[PathBuf],
) -> std::io::Result<()> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for rel in paths {
        if let Err(e) = append_path(&mut builder, project_dir, rel) {
            warn!("Skipping {:?}: {}", rel, e);
        }
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

fn append_path<W: Write>(
    builder: &mut tar::Builder<W>,
    project_dir: &Path,
    rel: &Path,
) -> std::io::Result<()> {
    let full = project_dir.join(rel);

    if full.is_file() {
        let mut file = File::open(&full)?;
        builder.append_file(rel, &mut file)?;
        return Ok(());
    }

    let walker = WalkDir::new(&full).into_iter().filter_entry(|entry| {
        let pruned = entry.file_type().is_dir()
            && (entry.file_name() == "node_modules" || entry.file_name() == ".git");
        !pruned
    });

    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        let rel_path = match path.strip_prefix(project_dir) {
            Ok(rel_path) if !rel_path.as_os_str().is_empty() => rel_path,
            _ => continue,
        };

        if entry.file_type().is_dir() {
            builder.append_dir(rel_path, path)?;
        } else if entry.file_type().is_file() {
            let mut file = File::open(path)?;
            builder.append_file(rel_path, &mut file)?;
        }
    }

    Ok(())
}

/// `std::io::Write` adapter that hands compressed chunks to the upload
/// stream. Runs on a blocking task, so `blocking_send` is safe here.
struct ChannelWriter {
    tx: mpsc::Sender<std::io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upload stream closed")
            })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn backend_selection_skips_vendored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/index.ts"));
        touch(&dir.path().join("dist/index.js"));
        touch(&dir.path().join("node_modules/express/index.js"));
        touch(&dir.path().join(".git/HEAD"));
        touch(&dir.path().join("package.json"));

        let paths = collect_artifact_paths(dir.path(), "express").unwrap();

        assert_eq!(
            paths,
            vec![
                PathBuf::from("dist"),
                PathBuf::from("package.json"),
                PathBuf::from("src"),
            ]
        );
    }

    #[test]
    fn nextjs_selection_includes_framework_paths() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join(".next/BUILD_ID"));
        touch(&dir.path().join("out/index.html"));
        touch(&dir.path().join("public/favicon.ico"));
        touch(&dir.path().join("package.json"));
        touch(&dir.path().join("bun.lockb"));
        touch(&dir.path().join("next.config.mjs"));

        let paths = collect_artifact_paths(dir.path(), "nextjs").unwrap();

        for expected in [
            "package.json",
            "bun.lockb",
            ".next",
            "public",
            "next.config.mjs",
            "out",
        ] {
            assert!(
                paths.contains(&PathBuf::from(expected)),
                "missing {expected} in {paths:?}"
            );
        }
        // package.json is both a lockfile and a framework path; no duplicate
        assert_eq!(
            paths.iter().filter(|p| *p == &PathBuf::from("package.json")).count(),
            1
        );
    }

    #[test]
    fn vite_selection_is_dist_plus_lockfiles() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("dist/index.html"));
        touch(&dir.path().join("package.json"));
        touch(&dir.path().join("src/main.ts"));

        let paths = collect_artifact_paths(dir.path(), "vite").unwrap();
        assert_eq!(paths, vec![PathBuf::from("package.json"), PathBuf::from("dist")]);
    }

    #[test]
    fn empty_selection_for_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let paths = collect_artifact_paths(dir.path(), "vite").unwrap();
        assert!(paths.is_empty());
    }

    #[test]
    fn archive_round_trips_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("src/index.ts"));
        fs::write(dir.path().join("src/index.ts"), b"console.log(1)").unwrap();
        touch(&dir.path().join("src/node_modules/dep/index.js"));
        touch(&dir.path().join("src/.git/config"));
        touch(&dir.path().join("package.json"));

        let paths = vec![PathBuf::from("src"), PathBuf::from("package.json")];
        let mut archive_bytes = Vec::new();
        write_archive(&mut archive_bytes, dir.path(), &paths).unwrap();

        // gzip-wrapped tar with relative entry names and no pruned components
        let decoder = flate2::read::GzDecoder::new(&archive_bytes[..]);
        let mut archive = tar::Archive::new(decoder);
        let entries: Vec<PathBuf> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().into_owned())
            .collect();

        assert!(entries.contains(&PathBuf::from("src/index.ts")));
        assert!(entries.contains(&PathBuf::from("package.json")));
        for entry in &entries {
            for component in entry.components() {
                let name = component.as_os_str();
                assert_ne!(name, "node_modules", "pruned dir leaked: {entry:?}");
                assert_ne!(name, ".git", "pruned dir leaked: {entry:?}");
            }
        }

        // extraction reproduces file contents byte for byte
        let out = tempfile::tempdir().unwrap();
        let decoder = flate2::read::GzDecoder::new(&archive_bytes[..]);
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(out.path()).unwrap();

        assert_eq!(
            fs::read(out.path().join("src/index.ts")).unwrap(),
            b"console.log(1)"
        );
        assert!(!out.path().join("src/node_modules").exists());
        assert!(!out.path().join("src/.git").exists());
    }

    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    type Uploads = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

    async fn capture_upload(
        axum::extract::State(uploads): axum::extract::State<Uploads>,
        axum::extract::Query(query): axum::extract::Query<HashMap<String, String>>,
        body: axum::body::Bytes,
    ) -> &'static str {
        let build_id = query.get("buildId").cloned().unwrap_or_default();
        uploads.lock().unwrap().push((build_id, body.to_vec()));
        "ok"
    }

    async fn start_uplink_stub() -> (SocketAddr, Uploads) {
        let uploads: Uploads = Arc::default();
        let app = axum::Router::new()
            .route("/artifacts/upload", axum::routing::post(capture_upload))
            .with_state(uploads.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, uploads)
    }

    #[tokio::test]
    async fn uploads_streamed_archive_to_the_uplink() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("dist/index.html"));
        fs::write(dir.path().join("dist/index.html"), b"<html></html>").unwrap();
        touch(&dir.path().join("package.json"));

        let (addr, uploads) = start_uplink_stub().await;
        let client = reqwest::Client::new();

        stream_artifact(
            &client,
            &format!("http://{addr}"),
            "build-42",
            dir.path(),
            "vite",
        )
        .await
        .unwrap();

        let uploads = uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let (build_id, body) = &uploads[0];
        assert_eq!(build_id, "build-42");

        // gzip magic, then a tar holding the selected files
        assert_eq!(&body[..2], &[0x1f, 0x8b][..]);
        let decoder = flate2::read::GzDecoder::new(&body[..]);
        let mut archive = tar::Archive::new(decoder);
        let entries: Vec<PathBuf> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().into_owned())
            .collect();
        assert!(entries.contains(&PathBuf::from("dist/index.html")));
        assert!(entries.contains(&PathBuf::from("package.json")));
    }

    #[tokio::test]
    async fn missing_output_fails_before_any_upload() {
        let dir = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();

        let err = stream_artifact(
            &client,
            "http://127.0.0.1:9",
            "build-43",
            dir.path(),
            "vite",
        )
        .await
        .unwrap_err();

        assert!(matches!(err, WorkerError::NoOutput));
    }
}
