use std::{fs, sync::Arc, time::Duration};

use interview_session::{
    models::Difficulty,
    oracle::bank::BankQuestion,
    AppState, CandidateProfile, QuestionBank, RecoveryDecision, SessionStatus,
};
use tempfile::TempDir;

fn bank() -> Arc<QuestionBank> {
    let question = |id: &str, difficulty: Difficulty| BankQuestion {
        id: id.to_string(),
        difficulty,
        prompt: format!("Prompt for {id}"),
        options: vec!["A".into(), "B".into(), "C".into()],
        answer: "A".into(),
        explanation: format!("A is right for {id}"),
        time_limit_seconds: None,
    };
    let questions = vec![
        question("e1", Difficulty::Easy),
        question("e2", Difficulty::Easy),
        question("m1", Difficulty::Medium),
        question("m2", Difficulty::Medium),
        question("h1", Difficulty::Hard),
        question("h2", Difficulty::Hard),
    ];
    Arc::new(QuestionBank::new(questions, 10).unwrap())
}

fn candidate() -> CandidateProfile {
    CandidateProfile {
        name: "Margaret".into(),
        email: "margaret@example.com".into(),
        phone: Some("555-0199".into()),
    }
}

#[tokio::test]
async fn mixed_answers_score_sixty_seven_percent() {
    let dir = TempDir::new().unwrap();
    let state = AppState::initialize(dir.path(), bank()).await.unwrap();

    let (adapter, decision) = state.enter("interview-42", candidate()).await.unwrap();
    assert_eq!(decision, RecoveryDecision::Fresh);

    let started = adapter.start().await;
    assert!(started.ok);
    assert_eq!(started.snapshot.question_number, 1);

    let mut last = started;
    for choice in ["A", "A", "B", "A", "B", "A"] {
        assert!(adapter.select_option(choice).await.ok);
        last = adapter.submit().await;
        assert!(last.ok, "{:?}", last.error);
    }

    assert_eq!(last.snapshot.status, SessionStatus::Completed);
    let summary = last.snapshot.summary.unwrap();
    assert_eq!(summary.total_score, 40);
    assert_eq!(summary.max_score, 60);
    assert_eq!(summary.percentage, 67);
    assert_eq!(summary.bucket(Difficulty::Medium).map(|b| b.score), Some(10));

    let (_, decision) = state.enter("interview-42", candidate()).await.unwrap();
    match decision {
        RecoveryDecision::ShowResults { summary } => assert_eq!(summary.total_score, 40),
        other => panic!("expected results, got {other:?}"),
    }
}

#[tokio::test]
async fn running_clock_auto_submits_every_question() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("settings.json"),
        r#"{
            "tickIntervalMs": 10,
            "heartbeatEveryTicks": 1,
            "timeBudgets": { "easySeconds": 2, "mediumSeconds": 2, "hardSeconds": 2 }
        }"#,
    )
    .unwrap();
    let state = AppState::initialize(dir.path(), bank()).await.unwrap();

    let (adapter, _) = state.enter("interview-7", candidate()).await.unwrap();
    assert!(adapter.start().await.ok);

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = adapter.snapshot().await;
            if snapshot.status == SessionStatus::Completed {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session should complete on its own");

    let summary = finished.summary.unwrap();
    assert_eq!(summary.auto_submitted_count, 6);
    assert_eq!(summary.total_score, 60);
    assert_eq!(summary.average_time_taken, 2);
}

#[tokio::test]
async fn reopening_the_process_welcomes_the_candidate_back() {
    let dir = TempDir::new().unwrap();

    let first_question = {
        let state = AppState::initialize(dir.path(), bank()).await.unwrap();
        let (adapter, _) = state.enter("interview-8", candidate()).await.unwrap();
        adapter.start().await;
        adapter.select_option("A").await;
        adapter.submit().await;
        let hidden = adapter.visibility_changed(false).await;
        assert_eq!(hidden.snapshot.status, SessionStatus::Paused);
        adapter.controller().shutdown().await;
        hidden.snapshot.question
    };

    let state = AppState::initialize(dir.path(), bank()).await.unwrap();
    let (adapter, decision) = state.enter("interview-8", candidate()).await.unwrap();
    assert_eq!(
        decision,
        RecoveryDecision::WelcomeBack {
            status: SessionStatus::Paused,
            answered: 1,
            total: 6,
            can_restart: false,
        }
    );

    let resumed = adapter.resume().await;
    assert!(resumed.ok, "{:?}", resumed.error);
    assert_eq!(resumed.snapshot.status, SessionStatus::InProgress);
    assert_eq!(resumed.snapshot.question_number, 2);
    assert_eq!(resumed.snapshot.question, first_question);
    assert_eq!(resumed.snapshot.activity.switch_count, 1);
    adapter.controller().shutdown().await;
}
