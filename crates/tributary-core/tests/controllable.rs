//! Pause/resume/stop/restart driven from a separate task

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tributary_core::control::StateObserver;
use tributary_core::{
    ControlOptions, ControlState, Controlled, ControllableStream, PullStream, StreamExt,
};

fn letters() -> Vec<&'static str> {
    vec!["a", "b", "c", "d", "e"]
}

#[tokio::test(start_paused = true)]
async fn test_session_from_controller_task() {
    let seen: Arc<Mutex<Vec<ControlState>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let observer: Box<dyn StateObserver> = Box::new(move |state: ControlState, _cursor: usize| {
        recorder.lock().unwrap().push(state);
    });

    let mut stream = ControllableStream::new(
        letters(),
        ControlOptions::default().with_delay(Duration::from_millis(100)),
        Some(observer),
    )
    .unwrap();
    let controller = stream.controller();

    // Pause after 150ms, resume 500ms later, let it finish
    let driver = tokio::spawn({
        let controller = controller.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            assert!(controller.pause());
            let snap = controller.state();
            assert_eq!(snap.state, ControlState::Paused);
            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(controller.resume());
        }
    });

    let mut data = Vec::new();
    while let Some(item) = stream.pull().await.unwrap() {
        match item {
            Controlled::Item { data: d, index, .. } => {
                assert_eq!(index, data.len());
                data.push(d);
            }
            Controlled::Completed => {}
            other => panic!("unexpected signal {:?}", other),
        }
    }
    driver.await.unwrap();

    assert_eq!(data, letters());
    assert_eq!(controller.state().state, ControlState::Completed);
    assert_eq!(controller.state().progress_label(), "100.0");
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            ControlState::Running,
            ControlState::Paused,
            ControlState::Running,
            ControlState::Completed,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_paused_ends_within_bound() {
    let mut stream = ControllableStream::new(
        letters(),
        ControlOptions::default().with_delay(Duration::ZERO),
        None,
    )
    .unwrap();
    let controller = stream.controller();

    assert!(matches!(stream.pull().await.unwrap(), Some(Controlled::Item { .. })));
    controller.pause();

    let consumer = tokio::spawn(async move {
        let signal = stream.pull().await.unwrap();
        let after = stream.pull().await.unwrap();
        (signal, after)
    });

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!consumer.is_finished());
    controller.stop();

    let (signal, after) = tokio::time::timeout(Duration::from_millis(10), consumer)
        .await
        .expect("stop should unblock the consumer")
        .unwrap();
    assert_eq!(signal, Some(Controlled::Stopped));
    assert_eq!(after, None);
}

#[tokio::test]
async fn test_restart_reproduces_sequence() {
    let mut stream = ControllableStream::new(
        letters(),
        ControlOptions::default().with_delay(Duration::ZERO),
        None,
    )
    .unwrap();
    let controller = stream.controller();

    let first: Vec<_> = (&mut stream).take(3).collect().await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(controller.state().cursor, 3);
    assert_eq!(controller.state().progress_label(), "60.0");

    controller.restart();
    assert_eq!(controller.state().state, ControlState::Ready);
    assert_eq!(controller.state().cursor, 0);

    let replay: Vec<&str> = stream
        .collect()
        .await
        .unwrap()
        .into_iter()
        .filter_map(Controlled::into_data)
        .collect();
    assert_eq!(replay, letters());
}

#[tokio::test]
async fn test_items_serialize_with_type_tag() {
    let mut stream = ControllableStream::new(
        vec![7u32],
        ControlOptions::default().with_delay(Duration::ZERO),
        None,
    )
    .unwrap();
    let item = stream.pull().await.unwrap().unwrap();
    let json = serde_json::to_value(&item).unwrap();
    assert_eq!(json["type"], "item");
    assert_eq!(json["data"], 7);
    assert_eq!(json["index"], 0);

    let done = stream.pull().await.unwrap().unwrap();
    assert_eq!(serde_json::to_value(&done).unwrap()["type"], "completed");
}
