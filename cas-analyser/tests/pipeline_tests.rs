//! End-to-end pipeline tests: file in, statistics out

use std::io::Write;

use cas_analyser::estimator::EstimatorKind;
use cas_analyser::input::{self, BongSink, InputFormat};
use cas_analyser::Pipeline;
use cas_common::config::CasConfig;
use cas_common::events::{CasEvent, EventBus};
use cas_common::Stroke;
use tempfile::NamedTempFile;

/// Strike times for evenly rung rounds with an open handstroke lead
fn rounds_times(n_rows: usize, bells: u8, gap: i64) -> Vec<Vec<(u8, i64)>> {
    let mut rows = Vec::new();
    let mut t = 1000;
    for i in 0..n_rows {
        if i % 2 == 0 && i > 0 {
            t += gap;
        }
        let mut row = Vec::new();
        for bell in 1..=bells {
            row.push((bell, t));
            t += gap;
        }
        rows.push(row);
    }
    rows
}

fn cas_text(rows: &[Vec<(u8, i64)>]) -> String {
    let mut text = String::from("CAS\n");
    let mut previous = 0;
    for (i, row) in rows.iter().enumerate() {
        text.push_str(if i % 2 == 0 { "H" } else { "B" });
        for &(bell, t) in row {
            text.push_str(&format!(" {} {}", bell, t - previous));
            previous = t;
        }
        text.push('\n');
    }
    text
}

fn temp_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn run_file(content: &str, config: CasConfig) -> Pipeline {
    let file = temp_file(content);
    let pipeline = Pipeline::new(config, EventBus::new(4096)).unwrap();
    let mut sink = pipeline.input(InputFormat::Cas, "test").unwrap();
    input::read_file(file.path(), None, &mut sink).unwrap();
    pipeline.wait_idle();
    pipeline
}

#[test]
fn test_cas_file_end_to_end() {
    let pipeline = run_file(&cas_text(&rounds_times(8, 6, 200)), CasConfig::default());

    assert_eq!(pipeline.n_rows(), 8);
    let strokes: Vec<bool> = pipeline.rows().iter().map(|r| r.is_handstroke()).collect();
    assert_eq!(strokes, vec![true, false, true, false, true, false, true, false]);

    let stats = pipeline.snapshot();
    assert_eq!(stats.n_rows(), 8);
    assert_eq!(stats.faults(false), 0);
    assert_eq!(stats.striking_rmse(false).whole, 0.0);
    assert!((stats.mean_interbell_gap(false).whole - 200.0).abs() < 1e-9);
}

#[test]
fn test_sensor_echo_removed_before_rows_form() {
    let mut rows = rounds_times(8, 6, 200);
    // Bell 3 rings twice, 15ms apart, in the third row
    let echo = (3, rows[2][2].1 + 15);
    rows[2].insert(3, echo);
    let pipeline = run_file(&cas_text(&rows), CasConfig::default());

    assert_eq!(pipeline.n_rows(), 8);
    for row in pipeline.rows() {
        let mut bells: Vec<u8> = row.iter().map(|b| b.bell).collect();
        bells.sort_unstable();
        assert_eq!(bells, vec![1, 2, 3, 4, 5, 6], "row {}", row);
    }
}

#[test]
fn test_lowndes_file_gets_strokes_assigned() {
    let mut text = String::from("# Lowndes test data\n");
    for row in rounds_times(8, 6, 200) {
        for (bell, t) in row {
            text.push_str(&format!("H {} 0X{:04X}\n", bell, t));
        }
    }
    let file = temp_file(&text);
    let pipeline = Pipeline::new(CasConfig::default(), EventBus::new(4096)).unwrap();
    let mut sink = pipeline.input(InputFormat::Lowndes, "lowndes").unwrap();
    let format = input::read_file(file.path(), None, &mut sink).unwrap();
    pipeline.wait_idle();

    assert_eq!(format, InputFormat::Lowndes);
    assert_eq!(pipeline.n_rows(), 8);
    for (i, row) in pipeline.rows().iter().enumerate() {
        assert_eq!(row.is_handstroke(), i % 2 == 0);
        assert!(row.iter().all(|b| b.stroke == Stroke::from_handstroke(i % 2 == 0)));
    }
}

#[test]
fn test_events_published_in_order() {
    let file = temp_file(&cas_text(&rounds_times(6, 5, 220)));
    let events = EventBus::new(4096);
    let mut rx = events.subscribe();
    let pipeline = Pipeline::new(CasConfig::default(), events).unwrap();
    let mut sink = pipeline.input(InputFormat::Cas, "ordered").unwrap();
    input::read_file(file.path(), None, &mut sink).unwrap();
    pipeline.wait_idle();

    let mut received = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.pipeline_id(), pipeline.id());
        received.push(event);
    }
    let types: Vec<&str> = received.iter().map(|e| e.event_type()).collect();
    assert_eq!(types.first(), Some(&"InputStarted"));
    assert!(types.contains(&"RowsAvailable"));
    assert!(types.contains(&"EstimatesAvailable"));

    let rung = types.iter().position(|t| *t == "LastRowRung").unwrap();
    let complete = types.iter().position(|t| *t == "AnalysisComplete").unwrap();
    assert!(rung < complete);
    match received.last() {
        Some(CasEvent::AnalysisComplete {
            estimator, n_rows, ..
        }) => {
            assert_eq!(estimator, "simple-averager");
            assert_eq!(*n_rows, 6);
        }
        other => panic!("expected AnalysisComplete last, got {:?}", other),
    }
}

#[test]
fn test_input_error_keeps_rows_read_so_far() {
    let mut text = cas_text(&rounds_times(4, 6, 200));
    text.push_str("H 1 x\n");
    let file = temp_file(&text);

    let events = EventBus::new(4096);
    let mut rx = events.subscribe();
    let pipeline = Pipeline::new(CasConfig::default(), events).unwrap();
    let mut sink = pipeline.input(InputFormat::Cas, "broken").unwrap();
    assert!(input::read_file(file.path(), None, &mut sink).is_err());
    pipeline.wait_idle();

    assert_eq!(pipeline.n_rows(), 4);
    assert!(pipeline.is_all_rows_rung());
    assert_eq!(pipeline.snapshot().n_rows(), 4);

    let mut failed = false;
    while let Ok(event) = rx.try_recv() {
        if let CasEvent::InputFailed { error, .. } = event {
            assert!(error.contains("line 6"));
            failed = true;
        }
    }
    assert!(failed);
}

#[test]
fn test_each_estimator_analyses_whole_touch() {
    let text = cas_text(&rounds_times(12, 8, 180));
    for kind in EstimatorKind::ALL {
        let mut config = CasConfig::default();
        config.analysis.estimator = kind.to_string();
        let pipeline = run_file(&text, config);
        let stats = pipeline.snapshot();
        assert_eq!(stats.n_rows(), 12, "{}", kind);
        assert_eq!(stats.n_bells(), 8, "{}", kind);
        assert!(stats.striking_rmse(false).whole < 1.0, "{}", kind);
    }
}

#[test]
fn test_strikes_after_completion_ignored() {
    let pipeline = Pipeline::new(CasConfig::default(), EventBus::new(64)).unwrap();
    let mut sink = pipeline.input(InputFormat::Cas, "direct").unwrap();
    for row in rounds_times(2, 4, 250) {
        for (bell, t) in row {
            sink.bong(cas_common::Bong::new(bell, t, Stroke::from_handstroke(t < 2000)));
        }
    }
    sink.input_complete();
    sink.bong(cas_common::Bong::new(1, 9000, Stroke::Hand));
    pipeline.wait_idle();
    assert_eq!(pipeline.n_rows(), 2);
}
