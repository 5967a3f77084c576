//! End-to-end tests: simulated bridge through ingestion, features,
//! classification and recording

use cortex_bci::{
    Classifier, Command, Credentials, CsvSink, Feature, FeatureMode, FilterParams, Model,
    ProtocolClient, Recorder, RecordingSink, SetupOptions, SignalProcessor, SimulatedBridge,
    SimulatedBridgeConfig, StreamIngester, CHANNEL_COUNT,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A running simulated stream at 128 Hz, windowed with `params`.
fn streaming_with(params: &FilterParams) -> (SimulatedBridge, StreamIngester) {
    let (bridge, client_end) = SimulatedBridge::spawn(SimulatedBridgeConfig::default()).unwrap();
    let session = ProtocolClient::establish(
        Arc::new(client_end),
        Credentials::new("pipeline-client", "pipeline-secret"),
        &SetupOptions::default(),
    )
    .unwrap();

    let ingester = StreamIngester::with_window("eeg", params);
    ingester.start(session).unwrap();
    (bridge, ingester)
}

fn streaming() -> (SimulatedBridge, StreamIngester) {
    streaming_with(&FilterParams::default())
}

/// Poll the ingester every `interval` until `processor` yields a feature.
///
/// Temporal features come from the ingester's window, everything else from
/// the latest frame.
fn first_feature(
    ingester: &StreamIngester,
    processor: &mut SignalProcessor,
    interval: Duration,
) -> Option<Feature> {
    let slot = ingester.slot();
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut last_seq = 0;

    while Instant::now() < deadline {
        let feature = match processor.mode() {
            FeatureMode::Temporal => ingester
                .latest_window()
                .and_then(|window| processor.window_features(&window)),
            FeatureMode::AcrossChannels => slot
                .entry()
                .filter(|entry| entry.seq > last_seq)
                .and_then(|entry| {
                    last_seq = entry.seq;
                    processor.features(&entry.frame)
                }),
        };
        if feature.is_some() {
            return feature;
        }
        thread::sleep(interval);
    }
    None
}

#[test]
fn test_stream_to_command() {
    let (_bridge, ingester) = streaming();
    let mut processor =
        SignalProcessor::new(FilterParams::default(), FeatureMode::Temporal).unwrap();

    let feature = first_feature(&ingester, &mut processor, Duration::from_millis(1))
        .expect("no feature within 10s");
    ingester.stop();

    assert_eq!(feature.len(), CHANNEL_COUNT);
    // The synthetic rhythm is about 12 uV, well inside the pass band
    for value in feature.values() {
        assert!(value.is_finite());
        assert!(*value > 1.0 && *value < 7.0, "log-variance {value} out of range");
    }

    let quiet = Classifier::from_model(Model::linear(
        FeatureMode::Temporal,
        vec![1.0; CHANNEL_COUNT],
        -1000.0,
        1,
        0,
    ));
    let active = Classifier::from_model(Model::linear(
        FeatureMode::Temporal,
        vec![1.0; CHANNEL_COUNT],
        0.0,
        1,
        0,
    ));
    assert_eq!(quiet.predict(&feature), Some(Command(0)));
    assert_eq!(active.predict(&feature), Some(Command(1)));
    assert_eq!(Classifier::none().predict(&feature), None);
}

#[test]
fn test_slow_control_loop_still_gets_temporal_features() {
    let params = FilterParams {
        window_len: 32,
        ..FilterParams::default()
    };
    let (_bridge, ingester) = streaming_with(&params);

    // 40 Hz against a 128 Hz stream: every poll skips frames
    let interval = Duration::from_millis(25);
    let slot = ingester.slot();
    let mut decimated = SignalProcessor::new(params, FeatureMode::Temporal).unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut polls = 0;
    while Instant::now() < deadline {
        if let Some(entry) = slot.entry() {
            polls += 1;
            assert_eq!(decimated.features(&entry.frame), None, "window spans skipped frames");
        }
        thread::sleep(interval);
    }
    assert!(polls > params.window_len, "only {polls} polls");

    let mut processor = SignalProcessor::new(params, FeatureMode::Temporal).unwrap();
    let feature =
        first_feature(&ingester, &mut processor, interval).expect("no window within 10s");
    ingester.stop();

    assert_eq!(feature.len(), CHANNEL_COUNT);
    assert!(feature.values().iter().all(|value| value.is_finite()));
}

#[test]
fn test_model_from_disk_drives_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    Model::linear(FeatureMode::AcrossChannels, vec![1.0], 0.0, 5, 6)
        .save(&path)
        .unwrap();

    let classifier = Classifier::load(&path);
    assert!(classifier.is_loaded());

    let (_bridge, ingester) = streaming();
    let mut processor =
        SignalProcessor::new(FilterParams::default(), FeatureMode::AcrossChannels).unwrap();
    let feature = first_feature(&ingester, &mut processor, Duration::from_millis(1))
        .expect("no frame within 10s");
    ingester.stop();

    assert_eq!(feature.len(), 1);
    assert!(classifier.predict(&feature).is_some());

    // A temporal feature has the wrong dimension for this model
    let temporal = Feature::new(vec![0.0; CHANNEL_COUNT]);
    assert_eq!(classifier.predict(&temporal), None);
}

#[test]
fn test_missing_model_yields_no_command() {
    let dir = tempfile::tempdir().unwrap();
    let classifier = Classifier::load(&dir.path().join("absent.json"));
    assert!(!classifier.is_loaded());
    assert_eq!(classifier.predict(&Feature::new(vec![1.0; CHANNEL_COUNT])), None);
}

#[test]
fn test_record_block_to_csv() {
    let (_bridge, ingester) = streaming();
    let recorder = Recorder::new(ingester.slot(), Duration::from_millis(2));
    let running = AtomicBool::new(true);

    let recording = recorder.record(Duration::from_millis(500), 7, &running);
    ingester.stop();

    assert_eq!(recording.label, 7);
    assert!(
        recording.frames.len() >= 30,
        "only {} frames in 0.5s at 128 Hz",
        recording.frames.len()
    );
    assert!(recording.frames.iter().all(|f| f.label == 7));

    let dir = tempfile::tempdir().unwrap();
    let mut sink = CsvSink::new(dir.path());
    sink.write(&recording).unwrap();

    let path = sink.path_for(&recording);
    assert!(path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("recording_7_") && name.ends_with(".csv")));

    let mut reader = csv::Reader::from_path(&path).unwrap();
    let headers = reader.headers().unwrap().clone();
    assert_eq!(headers.len(), CHANNEL_COUNT + 2);
    assert_eq!(&headers[0], "timestamp");
    assert_eq!(&headers[1], "AF3");
    assert_eq!(&headers[CHANNEL_COUNT + 1], "label");

    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), recording.frames.len());

    let timestamps: Vec<f64> = rows.iter().map(|r| r[0].parse().unwrap()).collect();
    assert!(timestamps.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(rows.iter().all(|r| &r[CHANNEL_COUNT + 1] == "7"));
}
