use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use leadflow_shared::{RunStatus, StepOutcome, StepType, WorkflowRun};

use crate::tests::fixtures::*;
use crate::tests::helpers::*;
use crate::workflows::actions::{ActionResult, MockActionDispatcher};
use crate::workflows::{
    ActionType, CompiledWorkflow, DispatchError, SchemaRegistry, WorkflowDefinition, WorkflowExecutor, WorkflowStep,
};

fn executor(store: &Arc<InMemoryStore>, dispatcher: MockActionDispatcher) -> WorkflowExecutor {
    WorkflowExecutor::new(store.clone(), Arc::new(dispatcher), Arc::new(SchemaRegistry::crm()))
}

fn seed(store: &InMemoryStore, definition: &WorkflowDefinition, record: serde_json::Value) -> (CompiledWorkflow, Uuid) {
    let workflow = CompiledWorkflow::compile(definition).unwrap();
    let run = WorkflowRun::new(definition.id, definition.company_id, None, record, fixed_now());
    let run_id = run.id;
    store.seed_run(run);
    (workflow, run_id)
}

fn outcomes(run: &WorkflowRun) -> Vec<(i32, StepOutcome)> {
    run.step_results.iter().map(|r| (r.position, r.outcome)).collect()
}

#[tokio::test]
async fn test_high_value_lead_alert_dispatches_both_actions() {
    init_test_logging();
    let store = InMemoryStore::new();
    let company = Uuid::new_v4();
    let (workflow, run_id) = seed(&store, &high_value_lead_alert(company), json!({"estimated_budget": 150000}));

    let result = executor(&store, accepting_dispatcher(2))
        .execute(&workflow, run_id, fixed_now())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.actions_dispatched, 2);

    let run = store.run(run_id).unwrap();
    assert_eq!(
        outcomes(&run),
        vec![(1, StepOutcome::Matched), (2, StepOutcome::Dispatched), (3, StepOutcome::Dispatched)]
    );
    assert_eq!(run.dispatched_count(), 2);
}

#[tokio::test]
async fn test_reengage_skips_closed_leads() {
    let store = InMemoryStore::new();
    let now = fixed_now();
    let record = json!({
        "last_activity_at": (now - Duration::days(10)).to_rfc3339(),
        "status": "closed",
        "email": "lead@acme.test"
    });
    let (workflow, run_id) = seed(&store, &reengage_inactive_leads(Uuid::new_v4()), record);

    let result = executor(&store, silent_dispatcher())
        .execute(&workflow, run_id, now)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.actions_dispatched, 0);
    let run = store.run(run_id).unwrap();
    assert_eq!(outcomes(&run), vec![(1, StepOutcome::Skipped)]);
}

#[tokio::test]
async fn test_reengage_emails_open_inactive_leads() {
    let store = InMemoryStore::new();
    let now = fixed_now();
    let record = json!({
        "last_activity_at": (now - Duration::days(10)).to_rfc3339(),
        "status": "contacted",
        "email": "lead@acme.test",
        "first_name": "Ada"
    });
    let (workflow, run_id) = seed(&store, &reengage_inactive_leads(Uuid::new_v4()), record);

    let mut dispatcher = MockActionDispatcher::new();
    dispatcher
        .expect_dispatch()
        .withf(|req| {
            req.action_type == ActionType::SendEmail
                && req.parameter_str("to") == Some("lead@acme.test")
                && req.parameter_str("subject") == Some("Still interested, Ada?")
        })
        .times(1)
        .returning(|_| Ok(ActionResult::success(None)));

    let result = executor(&store, dispatcher).execute(&workflow, run_id, now).await.unwrap().unwrap();
    assert_eq!(result.actions_dispatched, 1);
}

#[tokio::test]
async fn test_action_parameters_are_rendered_against_snapshot() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::new(Uuid::new_v4(), "Follow up", crate::workflows::TriggerSpec::record_created("leads"))
        .with_action(
            ActionType::CreateTask,
            json!({
                "title": "Call {{first_name}}",
                "description": "Follow-up #{{follow_up_count}}",
                "priority": "high",
                "due_date": "{{now + 2 days}}",
                "attempt": "{{follow_up_count + 1}}",
                "tags": ["{{status}}", "auto"],
                "assigned_to": "{{owner_id}}"
            }),
        );
    let record = json!({"first_name": "Ada", "follow_up_count": 2, "status": "contacted", "owner_id": "u-7"});
    let (workflow, run_id) = seed(&store, &definition, record);

    let mut dispatcher = MockActionDispatcher::new();
    dispatcher
        .expect_dispatch()
        .withf(|req| {
            req.parameter_str("title") == Some("Call Ada")
                && req.parameter_str("due_date") == Some("2026-03-12T12:00:00Z")
                && req.parameters.get("attempt") == Some(&json!(3))
                && req.parameters.get("tags") == Some(&json!(["contacted", "auto"]))
        })
        .times(1)
        .returning(|_| Ok(ActionResult::success(None)));

    let result = executor(&store, dispatcher).execute(&workflow, run_id, fixed_now()).await.unwrap().unwrap();
    assert_eq!(result.actions_dispatched, 1);
}

#[tokio::test]
async fn test_false_gate_halts_later_actions() {
    let store = InMemoryStore::new();
    let (workflow, run_id) = seed(&store, &high_value_lead_alert(Uuid::new_v4()), json!({"estimated_budget": 90000}));

    let result = executor(&store, silent_dispatcher())
        .execute(&workflow, run_id, fixed_now())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.steps_executed, 1);
    assert_eq!(store.run(run_id).unwrap().dispatched_count(), 0);
}

#[tokio::test]
async fn test_non_numeric_budget_fails_gate_quietly() {
    let store = InMemoryStore::new();
    let (workflow, run_id) = seed(&store, &high_value_lead_alert(Uuid::new_v4()), json!({"estimated_budget": "lots"}));

    let result = executor(&store, silent_dispatcher())
        .execute(&workflow, run_id, fixed_now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_delay_resumes_only_when_due() {
    init_test_logging();
    let store = InMemoryStore::new();
    let t = fixed_now();
    let definition = nurture_sequence(Uuid::new_v4(), 3 * 24 * 3600);
    let (workflow, run_id) = seed(&store, &definition, json!({"email": "a@b.com", "first_name": "Ada"}));

    let first = executor(&store, accepting_dispatcher(1)).execute(&workflow, run_id, t).await.unwrap().unwrap();
    assert_eq!(first.status, RunStatus::WaitingDelay);
    assert_eq!(first.resume_at, Some(t + Duration::days(3)));

    let run = store.run(run_id).unwrap();
    assert_eq!(run.current_position, 3);
    assert_eq!(outcomes(&run), vec![(1, StepOutcome::Dispatched), (2, StepOutcome::Delayed)]);

    let early = executor(&store, silent_dispatcher())
        .execute(&workflow, run_id, t + Duration::days(1))
        .await
        .unwrap();
    assert!(early.is_none());
    assert_eq!(store.run(run_id).unwrap().status, RunStatus::WaitingDelay);

    let mut dispatcher = MockActionDispatcher::new();
    dispatcher
        .expect_dispatch()
        .withf(|req| req.action_type == ActionType::CreateTask && req.context.position == 3)
        .times(1)
        .returning(|_| Ok(ActionResult::success(None)));

    let resumed = executor(&store, dispatcher)
        .execute(&workflow, run_id, t + Duration::days(3))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resumed.status, RunStatus::Completed);
    assert_eq!(resumed.actions_dispatched, 1);

    let run = store.run(run_id).unwrap();
    assert_eq!(run.dispatched_count(), 2);
    assert_eq!(run.step_results.last().map(|r| r.position), Some(3));
}

#[tokio::test]
async fn test_zero_delay_continues_inline() {
    let store = InMemoryStore::new();
    let (workflow, run_id) = seed(&store, &nurture_sequence(Uuid::new_v4(), 0), json!({"email": "a@b.com"}));

    let result = executor(&store, accepting_dispatcher(2))
        .execute(&workflow, run_id, fixed_now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.resume_at.is_none());
}

#[tokio::test]
async fn test_dispatch_failure_fails_run() {
    let store = InMemoryStore::new();
    let (workflow, run_id) = seed(&store, &high_value_lead_alert(Uuid::new_v4()), json!({"estimated_budget": 250000}));

    let mut dispatcher = MockActionDispatcher::new();
    dispatcher
        .expect_dispatch()
        .times(1)
        .returning(|req| Err(DispatchError::new(req.action_type.as_str(), "task service unavailable")));

    let result = executor(&store, dispatcher).execute(&workflow, run_id, fixed_now()).await.unwrap().unwrap();
    assert_eq!(result.status, RunStatus::Failed);

    let run = store.run(run_id).unwrap();
    let last = run.step_results.last().unwrap();
    assert_eq!(last.outcome, StepOutcome::Failed);
    assert!(last.detail.as_deref().unwrap().contains("task service unavailable"));
}

#[tokio::test]
async fn test_invalid_action_step_is_skipped() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::new(Uuid::new_v4(), "Broken email", crate::workflows::TriggerSpec::record_created("leads"))
        .with_action(ActionType::SendEmail, json!({"to": "{{email}}"}))
        .with_action(ActionType::SendSms, json!({"to": "{{phone}}", "message": "Hi"}));
    let (workflow, run_id) = seed(&store, &definition, json!({"phone": "+15550100"}));

    let result = executor(&store, accepting_dispatcher(1))
        .execute(&workflow, run_id, fixed_now())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    let run = store.run(run_id).unwrap();
    assert_eq!(outcomes(&run), vec![(1, StepOutcome::Skipped), (2, StepOutcome::Dispatched)]);
}

#[tokio::test]
async fn test_false_path_jumps_forward() {
    let store = InMemoryStore::new();
    let definition = WorkflowDefinition::new(Uuid::new_v4(), "Branching", crate::workflows::TriggerSpec::record_created("leads"))
        .with_step(WorkflowStep {
            position: 1,
            step_type: StepType::Condition,
            config: json!({
                "logic_operator": "AND",
                "conditions": [{"field": "estimated_budget", "operator": "greater_than", "value": "100000"}],
                "false_path_position": 3
            }),
        })
        .with_step(WorkflowStep {
            position: 2,
            step_type: StepType::Action,
            config: json!({"action_type": "send_notification", "parameters": {"message": "big", "user_id": "u1"}}),
        })
        .with_step(WorkflowStep {
            position: 3,
            step_type: StepType::Action,
            config: json!({"action_type": "send_email", "parameters": {"to": "{{email}}", "subject": "Hi", "body": "Small lead"}}),
        });
    let (workflow, run_id) = seed(&store, &definition, json!({"estimated_budget": 10, "email": "a@b.com"}));

    let mut dispatcher = MockActionDispatcher::new();
    dispatcher
        .expect_dispatch()
        .withf(|req| req.action_type == ActionType::SendEmail)
        .times(1)
        .returning(|_| Ok(ActionResult::success(None)));

    let result = executor(&store, dispatcher).execute(&workflow, run_id, fixed_now()).await.unwrap().unwrap();
    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(outcomes(&store.run(run_id).unwrap()), vec![(1, StepOutcome::Skipped), (3, StepOutcome::Dispatched)]);
}

#[tokio::test]
async fn test_finished_and_cancelled_runs_are_not_executed() {
    let store = InMemoryStore::new();
    let definition = high_value_lead_alert(Uuid::new_v4());
    let (workflow, run_id) = seed(&store, &definition, json!({"estimated_budget": 150000}));

    let mut run = store.run(run_id).unwrap();
    run.status = RunStatus::Cancelled;
    store.seed_run(run);

    let result = executor(&store, silent_dispatcher()).execute(&workflow, run_id, fixed_now()).await.unwrap();
    assert!(result.is_none());
}

#[tokio::test]
async fn test_stale_version_is_rejected() {
    use crate::workflows::{PersistenceError, WorkflowStore};

    let store = InMemoryStore::new();
    let (_, run_id) = seed(&store, &high_value_lead_alert(Uuid::new_v4()), json!({}));

    let mut first = store.run(run_id).unwrap();
    let stale = first.clone();

    first.status = RunStatus::Running;
    let version = store.save_run(&first).await.unwrap();
    assert_eq!(version, 1);

    let err = store.save_run(&stale).await.unwrap_err();
    assert!(matches!(err, PersistenceError::VersionConflict { expected_version: 0, .. }));
}
