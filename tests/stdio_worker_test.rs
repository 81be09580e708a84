#![cfg(unix)]

use image::{Rgba, RgbaImage};
use std::fs;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cutout_rs::{
    Editor, NormalizedPoint, PointPrompt, RequestId, StdioWorker, WorkerRequest, WorkerResponse,
    WorkerTransport,
};

type Spawned = (StdioWorker, mpsc::Receiver<WorkerResponse>);

const WAIT: Duration = Duration::from_secs(10);

// Answers segment with a junk line, the start sentinel and an embedding,
// and decode with two candidates over a 2x1 grid.
const WORKER_SCRIPT: &str = r#"
while read -r line; do
  case "$line" in
    *'"type":"segment"'*)
      echo 'not json'
      echo ''
      echo '{"type":"segment_result","id":1,"data":"start"}'
      echo '{"type":"segment_result","id":1,"data":{"dims":[1,256,64,64]}}'
      ;;
    *'"type":"decode"'*)
      echo '{"type":"decode_result","id":2,"data":{"mask":{"width":2,"height":1,"data":[0,1,1,0]},"scores":[0.2,0.9]}}'
      ;;
  esac
done
"#;

fn spawn_worker(dir: &tempfile::TempDir) -> Result<Spawned, Box<dyn std::error::Error>> {
    let script = dir.path().join("worker.sh");
    fs::write(&script, WORKER_SCRIPT)?;
    Ok(StdioWorker::spawn("sh", &[script.to_string_lossy().into_owned()])?)
}

#[tokio::test]
async fn test_editor_over_child_process() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (worker, responses) = spawn_worker(&dir)?;
    let mut editor = Editor::new(worker, responses);
    let cancel = CancellationToken::new();

    let mut background = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
    background.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
    editor.set_background(background).await?;
    editor.wait_for_embedding(WAIT, &cancel).await?;

    let prompt = PointPrompt::positive(NormalizedPoint::new(0.25, 0.5)?);
    assert_eq!(editor.add_point(prompt).await?, RequestId(2));
    let selection = editor.wait_for_mask(WAIT, &cancel).await?;
    assert_eq!(selection.mask.data, vec![1, 0]);
    assert_eq!(selection.mask.score, 0.9);

    let object = editor.commit_selection()?;
    assert_eq!((object.width(), object.height()), (1, 1));
    assert_eq!(object.image.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));

    editor.transport().shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_send_after_exit_fails() -> Result<(), Box<dyn std::error::Error>> {
    let args = ["-c".to_string(), "exit 0".to_string()];
    let (worker, mut responses) = StdioWorker::spawn("sh", &args)?;

    // stdout closes with the process, which ends the response stream
    assert!(tokio::time::timeout(WAIT, responses.recv()).await?.is_none());

    let request = WorkerRequest::Segment {
        id: RequestId(1),
        data: "data:image/png;base64,".to_string(),
    };
    assert!(worker.send(request).await.is_err());
    worker.shutdown().await?;
    Ok(())
}
