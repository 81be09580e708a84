use image::{Rgba, RgbaImage};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use cutout_rs::mask_codec::dilate;
use cutout_rs::mocks::{candidates, MockFillService, MockWorker};
use cutout_rs::{
    BoundingBox, CutoutError, Editor, EditorEvent, FillConfig, FillOrchestrator, NormalizedPoint,
    PointPrompt, RequestId, SegmentPayload, WorkerRequest, WorkerResponse,
};

const WAIT: Duration = Duration::from_secs(5);

fn photo(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    })
}

fn click(x: f32, y: f32) -> PointPrompt {
    PointPrompt::positive(NormalizedPoint::new(x, y).unwrap())
}

fn square(min: u32, max: u32) -> BoundingBox {
    BoundingBox {
        min_x: min,
        min_y: min,
        max_x: max,
        max_y: max,
    }
}

async fn ready_editor(
    selection: Option<BoundingBox>,
) -> Result<Editor<MockWorker>, Box<dyn std::error::Error>> {
    let (worker, responses) = MockWorker::segmenter(100, 100, selection);
    let mut editor = Editor::new(worker, responses);
    editor.set_background(photo(100, 100)).await?;
    editor
        .wait_for_embedding(WAIT, &CancellationToken::new())
        .await?;
    Ok(editor)
}

#[tokio::test]
async fn test_click_to_object() -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = ready_editor(Some(square(40, 59))).await?;
    let cancel = CancellationToken::new();

    editor.add_point(click(0.5, 0.5)).await?;
    let selection = editor.wait_for_mask(WAIT, &cancel).await?;
    assert_eq!(selection.mask.score, 0.75);
    assert_eq!(selection.mask.count_set(), 400);

    let object = editor.commit_selection()?;
    assert_eq!(object.bounding_box, square(40, 59));
    assert_eq!((object.width(), object.height()), (20, 20));
    assert_eq!(object.image.get_pixel(0, 0), &Rgba([40, 40, 128, 255]));

    assert_eq!(editor.objects().len(), 1);
    assert!(editor.prompts().is_empty());
    assert!(editor.selection().is_none());

    // the decode carried the full prompt list in normalized coordinates
    let requests = editor.transport().requests();
    match requests.last() {
        Some(WorkerRequest::Decode { data, .. }) => assert_eq!(data, &vec![click(0.5, 0.5)]),
        other => panic!("Expected decode request, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_empty_mask_is_no_selection() -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = ready_editor(None).await?;
    editor.add_point(click(0.5, 0.5)).await?;
    editor
        .wait_for_mask(WAIT, &CancellationToken::new())
        .await?;

    assert!(matches!(
        editor.commit_selection(),
        Err(CutoutError::NoSelection)
    ));
    assert!(editor.objects().is_empty());
    Ok(())
}

#[test]
fn test_paint_out_dilation() -> Result<(), Box<dyn std::error::Error>> {
    let mut mask = vec![0u8; 100 * 100];
    mask[50 * 100 + 50] = 1;
    let grown = dilate(&mask, 100, 100, 10)?;
    let bbox = cutout_rs::mask_codec::bounding_box_of(&grown, 100, 100)?.unwrap();
    assert_eq!(bbox, square(40, 60));
    assert_eq!(grown.iter().filter(|&&v| v == 1).count(), 21 * 21);

    let mut corner = vec![0u8; 100 * 100];
    corner[3 * 100 + 3] = 1;
    let grown = dilate(&corner, 100, 100, 10)?;
    assert_eq!(grown.iter().filter(|&&v| v == 1).count(), 14 * 14);
    Ok(())
}

#[tokio::test]
async fn test_out_of_order_decode_results() -> Result<(), Box<dyn std::error::Error>> {
    let (worker, responses) = MockWorker::new();
    let mut editor = Editor::new(worker, responses);
    editor.set_background(photo(100, 100)).await?;

    let segment = editor.transport().last_request().unwrap().id();
    editor.handle_response(WorkerResponse::SegmentResult {
        id: segment,
        data: SegmentPayload::Ready(cutout_rs::Embedding(serde_json::json!([]))),
    })?;

    let first = editor.add_point(click(0.2, 0.2)).await?;
    let second = editor.add_point(click(0.8, 0.8)).await?;
    assert!(second > first);

    let decoded = |id, bbox| WorkerResponse::DecodeResult {
        id,
        data: candidates(100, 100, Some(bbox)),
    };
    let cancel = CancellationToken::new();

    // newer result first, then the late older one
    let worker = editor.transport();
    worker.respond(decoded(second, square(70, 89))).await?;
    worker.respond(decoded(first, square(10, 29))).await?;
    assert_eq!(
        editor.next_event(WAIT, &cancel).await?,
        EditorEvent::MaskReady(second)
    );
    assert_eq!(
        editor.next_event(WAIT, &cancel).await?,
        EditorEvent::Stale(first)
    );
    assert_eq!(editor.selection().unwrap().request, second);

    // older result first, then the newer one
    let third = editor.add_point(click(0.5, 0.5)).await?;
    let worker = editor.transport();
    worker.respond(decoded(second, square(10, 29))).await?;
    worker.respond(decoded(third, square(70, 89))).await?;
    assert_eq!(
        editor.next_event(WAIT, &cancel).await?,
        EditorEvent::Stale(second)
    );
    assert_eq!(
        editor.next_event(WAIT, &cancel).await?,
        EditorEvent::MaskReady(third)
    );

    let object = editor.commit_selection()?;
    assert_eq!(object.bounding_box, square(70, 89));
    Ok(())
}

#[tokio::test]
async fn test_embedding_for_old_background_is_dropped() -> Result<(), Box<dyn std::error::Error>> {
    let (worker, responses) = MockWorker::new();
    let mut editor = Editor::new(worker, responses);

    editor.set_background(photo(10, 10)).await?;
    let old = editor.transport().last_request().unwrap().id();
    editor.set_background(photo(20, 20)).await?;

    let event = editor.handle_response(WorkerResponse::SegmentResult {
        id: old,
        data: SegmentPayload::Ready(cutout_rs::Embedding(serde_json::json!("old"))),
    })?;
    assert_eq!(event, EditorEvent::Stale(old));
    assert!(!editor.is_ready());
    assert!(matches!(
        editor.add_point(click(0.5, 0.5)).await,
        Err(CutoutError::DecodingUnavailable)
    ));
    assert_eq!(old, RequestId(1));
    Ok(())
}

#[tokio::test]
async fn test_commit_and_erase() -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = ready_editor(Some(square(40, 59))).await?;
    let cancel = CancellationToken::new();
    editor.add_point(click(0.5, 0.5)).await?;
    editor.wait_for_mask(WAIT, &cancel).await?;

    let orchestrator = FillOrchestrator::new(
        MockFillService::solid(Rgba([0, 255, 0, 255])),
        FillConfig {
            working_size: Some((32, 32)),
            dilate_radius: 10,
        },
    );
    let object = editor.commit_and_erase(&orchestrator, &cancel).await?;
    assert_eq!(object.bounding_box, square(40, 59));

    let background = editor.background().unwrap();
    assert_eq!(background.dimensions(), (100, 100));
    assert!(background.get_pixel(50, 50)[1] > 250);
    assert!(editor.prompts().is_empty());
    assert!(!editor.is_ready());
    assert!(matches!(
        editor.transport().last_request(),
        Some(WorkerRequest::Segment { .. })
    ));

    let calls = orchestrator.service().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].mask.dimensions(), (32, 32));
    Ok(())
}

#[tokio::test]
async fn test_failed_fill_changes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = ready_editor(Some(square(40, 59))).await?;
    let cancel = CancellationToken::new();
    editor.add_point(click(0.5, 0.5)).await?;
    editor.wait_for_mask(WAIT, &cancel).await?;
    let before = editor.background().unwrap().clone();

    let orchestrator = FillOrchestrator::new(MockFillService::failing(500), FillConfig::default());
    let result = editor.commit_and_erase(&orchestrator, &cancel).await;

    assert!(matches!(
        result,
        Err(CutoutError::Transport {
            status: Some(500),
            ..
        })
    ));
    assert_eq!(editor.background(), Some(&before));
    assert!(editor.objects().is_empty());
    assert!(editor.selection().is_some());
    assert!(editor.is_ready());
    Ok(())
}

#[tokio::test]
async fn test_undelivered_background_changes_nothing() -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = ready_editor(Some(square(40, 59))).await?;
    let cancel = CancellationToken::new();
    editor.add_point(click(0.5, 0.5)).await?;
    editor.wait_for_mask(WAIT, &cancel).await?;
    let before = editor.background().unwrap().clone();

    let orchestrator = FillOrchestrator::new(
        MockFillService::solid(Rgba([0, 255, 0, 255])),
        FillConfig::default(),
    );
    editor.transport().set_failing(true);
    let result = editor.commit_and_erase(&orchestrator, &cancel).await;

    assert!(matches!(result, Err(CutoutError::Worker { .. })));
    assert_eq!(orchestrator.service().calls().len(), 1);
    assert_eq!(editor.background(), Some(&before));
    assert!(editor.objects().is_empty());
    assert!(editor.selection().is_some());
    assert!(editor.is_ready());

    editor.transport().set_failing(false);
    editor.commit_and_erase(&orchestrator, &cancel).await?;
    assert_eq!(editor.objects().len(), 1);
    Ok(())
}
