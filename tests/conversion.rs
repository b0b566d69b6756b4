use std::error::Error;
use std::time::Duration;

use assert_fs::TempDir;
use assert_fs::fixture::PathChild;

use pixbatch::{ConversionConfig, EngineError, ImageFormatKind, JobError, JobState, ResizeSpec};

mod fixtures;

fn webp_with_workers(workers: usize) -> ConversionConfig {
    ConversionConfig {
        format: ImageFormatKind::Webp,
        worker_count: workers,
        ..ConversionConfig::default()
    }
}

#[test]
fn png_batch_converts_to_webp() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    let photos = temp.child("photos");
    let sources: Vec<_> = ["a.png", "b.png", "c.png"]
        .iter()
        .map(|name| fixtures::write_png(&temp, &format!("photos/{name}"), 12, 8))
        .collect();
    let before: Vec<u64> = sources.iter().map(|path| fixtures::file_size(path)).collect();

    let engine = fixtures::engine(&temp);
    let handle = engine.start_conversion(photos.path(), webp_with_workers(2))?;
    let updates: Vec<_> = handle.progress().collect();
    let report = handle.summary()?;

    assert_eq!(report.summary.succeeded, 3);
    assert_eq!(report.summary.failed, 0);
    assert_eq!(report.summary.submitted, 3);
    assert_eq!(updates.len(), 3);
    assert!(updates.iter().all(|u| u.status.is_terminal()));
    assert_eq!(updates.last().map(|u| u.completed), Some(3));

    for (source, size) in sources.iter().zip(before) {
        let output = source.with_extension("webp");
        assert!(output.exists(), "missing {}", output.display());
        assert_eq!(fixtures::file_size(source), size, "original must be untouched");
        let info = pixbatch::inspect(&output)?;
        assert_eq!(info.format, Some(ImageFormatKind::Webp));
        assert_eq!((info.width, info.height), (12, 8));
    }

    let order: Vec<_> = report
        .results
        .iter()
        .filter_map(|r| r.source.file_name())
        .collect();
    assert_eq!(order, ["a.png", "b.png", "c.png"]);

    Ok(())
}

#[test]
fn converted_outputs_are_skipped_on_rerun() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    fixtures::write_png(&temp, "in/one.png", 6, 6);
    fixtures::write_png(&temp, "in/nested/two.png", 6, 6);
    let out = temp.child("out");

    let engine = fixtures::engine(&temp);
    let config = ConversionConfig {
        output_dir: Some(out.path().to_path_buf()),
        ..webp_with_workers(2)
    };
    let first = engine
        .start_conversion(temp.child("in").path(), config.clone())?
        .summary()?;
    assert_eq!(first.summary.succeeded, 2);
    assert_eq!(
        fixtures::listing(out.path()),
        vec!["nested/two.webp".to_string(), "one.webp".to_string()]
    );

    let second = engine.start_conversion(out.path(), config)?.summary()?;
    assert_eq!(second.summary.skipped, 2);
    assert_eq!(second.summary.succeeded, 0);
    assert!(second.results.iter().all(|r| r.status == JobState::Skipped));

    Ok(())
}

#[test]
fn in_place_rerun_skips_every_file() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    for name in ["a", "b", "c"] {
        fixtures::write_png(&temp, &format!("p/{name}.png"), 5, 3);
    }
    let engine = fixtures::engine(&temp);
    let root = temp.child("p");

    let first = engine
        .start_conversion(root.path(), ConversionConfig::default())?
        .summary()?;
    assert_eq!(first.summary.succeeded, 3);
    let written = std::fs::read(temp.child("p/a.webp").path())?;

    let rerun = engine
        .start_conversion(root.path(), ConversionConfig::default())?
        .summary()?;
    assert_eq!(rerun.summary.failed, 0);
    assert_eq!(rerun.summary.succeeded, 0);
    assert_eq!(rerun.summary.skipped, 6, "three originals and three earlier outputs");
    assert_eq!(std::fs::read(temp.child("p/a.webp").path())?, written);

    Ok(())
}

#[test]
fn existing_output_is_a_collision() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    fixtures::write_png(&temp, "src/keep.png", 4, 4);
    fixtures::write_png(&temp, "src/fresh.png", 4, 4);
    let squatter = fixtures::write_bytes(&temp, "src/keep.webp", b"not yours");

    let engine = fixtures::engine(&temp);
    let report = engine
        .start_conversion(temp.child("src").path(), webp_with_workers(1))?
        .summary()?;

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.skipped, 1, "the existing .webp is already in target format");
    assert_eq!(std::fs::read(&squatter)?, b"not yours");

    let collided = report
        .results
        .iter()
        .find(|r| r.status == JobState::Failed)
        .ok_or("no failed result")?;
    assert!(matches!(collided.error, Some(JobError::OutputCollision { .. })));
    assert!(collided.source.ends_with("keep.png"));

    Ok(())
}

#[test]
fn two_sources_sharing_an_output_collide() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    fixtures::write_png(&temp, "src/shot.png", 4, 4);
    fixtures::write_bytes(&temp, "src/shot.jpg", b"irrelevant");

    let report = fixtures::engine(&temp)
        .start_conversion(temp.child("src").path(), webp_with_workers(2))?
        .summary()?;

    // Scan order puts shot.jpg first, so shot.png loses the shared name.
    let png = report
        .results
        .iter()
        .find(|r| r.source.ends_with("shot.png"))
        .ok_or("shot.png missing")?;
    assert!(matches!(png.error, Some(JobError::OutputCollision { .. })));
    assert_eq!(report.summary.failed, 2, "the jpg is not a real image either");

    Ok(())
}

#[test]
fn broken_file_does_not_stop_siblings() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    fixtures::write_png(&temp, "mixed/good1.png", 5, 5);
    fixtures::write_bytes(&temp, "mixed/broken.png", b"\x89PNG but not really");
    fixtures::write_png(&temp, "mixed/good2.png", 5, 5);

    let report = fixtures::engine(&temp)
        .start_conversion(temp.child("mixed").path(), webp_with_workers(3))?
        .summary()?;

    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.failures.len(), 1);
    assert!(report.summary.failures[0].path.ends_with("broken.png"));
    assert!(temp.child("mixed/good1.webp").path().exists());
    assert!(temp.child("mixed/good2.webp").path().exists());
    assert!(!temp.child("mixed/broken.webp").path().exists());

    Ok(())
}

#[test]
fn panicking_codec_fails_only_its_job() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    fixtures::write_png(&temp, "set/narrow.png", 4, 4);
    fixtures::write_png(&temp, "set/wide.png", 40, 4);

    let engine = fixtures::engine_with_codec(&temp, fixtures::PickyCodec { max_width: 10 });
    let report = engine
        .start_conversion(temp.child("set").path(), webp_with_workers(2))?
        .summary()?;

    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    let wide = &report.results[1];
    assert!(matches!(wide.error, Some(JobError::Panicked(_))));

    Ok(())
}

#[test]
fn cancellation_stops_dispatch_and_leaves_no_partials() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    for index in 0..12 {
        fixtures::write_png(&temp, &format!("many/{index:02}.png"), 4, 4);
    }

    let engine = fixtures::engine_with_codec(&temp, fixtures::SlowCodec(Duration::from_millis(60)));
    let handle = engine.start_conversion(temp.child("many").path(), webp_with_workers(1))?;
    let first = handle.progress().next().ok_or("no progress before cancel")?;
    assert_eq!(first.status, JobState::Succeeded);
    handle.cancel();
    let report = handle.summary()?;

    let summary = &report.summary;
    assert!(summary.cancelled);
    assert_eq!(summary.discovered, 12);
    assert!(summary.submitted < 12, "submitted {}", summary.submitted);
    assert_eq!(summary.succeeded + summary.failed + summary.skipped, summary.submitted);

    let listing = fixtures::listing(temp.child("many").path());
    let outputs = listing.iter().filter(|name| name.ends_with(".webp")).count();
    assert_eq!(outputs, summary.succeeded);
    assert!(listing.iter().all(|name| !name.ends_with(".tmp")));

    Ok(())
}

#[test]
fn cancel_token_stops_the_run_from_another_thread() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    for index in 0..12 {
        fixtures::write_png(&temp, &format!("many/{index:02}.png"), 4, 4);
    }

    let engine = fixtures::engine_with_codec(&temp, fixtures::SlowCodec(Duration::from_millis(60)));
    let handle = engine.start_conversion(temp.child("many").path(), webp_with_workers(1))?;
    let token = handle.cancel_token();
    let interrupter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        token.cancel();
    });
    let report = handle.summary()?;
    interrupter.join().map_err(|_| "interrupter panicked")?;

    assert!(report.summary.cancelled);
    assert!(report.summary.submitted < 12, "submitted {}", report.summary.submitted);
    assert_eq!(report.results.len(), report.summary.submitted);

    Ok(())
}

#[test]
fn resize_with_aspect_lock_and_delete_original() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    let source = fixtures::write_png(&temp, "big/panorama.png", 40, 20);

    let config = ConversionConfig {
        format: ImageFormatKind::Png,
        resize: Some(ResizeSpec {
            width: Some(10),
            height: None,
            keep_aspect: true,
            filter: Default::default(),
        }),
        suffix: String::from("_small"),
        delete_original: true,
        worker_count: 1,
        ..ConversionConfig::default()
    };
    let report = fixtures::engine(&temp)
        .start_conversion(temp.child("big").path(), config)?
        .summary()?;

    assert_eq!(report.summary.succeeded, 1);
    let output = temp.child("big/panorama_small.png");
    let decoded = fixtures::decode_rgba(output.path());
    assert_eq!((decoded.width, decoded.height), (10, 5));
    assert!(!source.exists(), "original should be removed after a durable write");

    Ok(())
}

#[test]
fn png_text_chunks_follow_when_preserving() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    fixtures::write_png_with_text(&temp, "meta/keep/tagged.png");
    fixtures::write_png_with_text(&temp, "meta/strip/tagged.png");
    let resize = Some(ResizeSpec {
        width: Some(2),
        height: None,
        keep_aspect: true,
        filter: Default::default(),
    });
    let engine = fixtures::engine(&temp);

    let keep = ConversionConfig {
        format: ImageFormatKind::Png,
        resize,
        suffix: String::from("_thumb"),
        worker_count: 1,
        ..ConversionConfig::default()
    };
    engine
        .start_conversion(temp.child("meta/keep").path(), keep.clone())?
        .summary()?;
    let strip = ConversionConfig {
        preserve_metadata: false,
        ..keep
    };
    engine
        .start_conversion(temp.child("meta/strip").path(), strip)?
        .summary()?;

    let kept = fixtures::chunk_names(temp.child("meta/keep/tagged_thumb.png").path());
    let stripped = fixtures::chunk_names(temp.child("meta/strip/tagged_thumb.png").path());
    assert!(kept.contains(b"tEXt"), "kept chunks: {kept:?}");
    assert!(kept.contains(b"pHYs"));
    assert!(!stripped.contains(b"tEXt"), "stripped chunks: {stripped:?}");

    Ok(())
}

#[test]
fn invalid_config_fails_before_any_work() -> Result<(), Box<dyn Error>> {
    let temp = TempDir::new()?;
    fixtures::write_png(&temp, "root/a.png", 4, 4);
    let engine = fixtures::engine(&temp);

    let config = ConversionConfig {
        resize: Some(ResizeSpec {
            width: Some(5),
            height: Some(5),
            keep_aspect: true,
            filter: Default::default(),
        }),
        ..ConversionConfig::default()
    };
    let err = engine
        .start_conversion(temp.child("root").path(), config)
        .unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    let missing = engine
        .start_conversion(temp.child("nope").path(), ConversionConfig::default())
        .unwrap_err();
    assert!(matches!(missing, EngineError::Path { .. }));

    assert_eq!(fixtures::listing(temp.child("root").path()), vec!["a.png".to_string()]);
    assert!(engine.list_history(10)?.is_empty());

    Ok(())
}
