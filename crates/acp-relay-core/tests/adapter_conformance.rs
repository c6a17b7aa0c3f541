//! Every built-in adapter must pass the conformance harness unmodified

use acp_relay_core::{
    run_adapter_conformance, AcpErrorCode, AcpRuntime, ConformanceOptions, ScriptedRuntime,
    TurnEvent,
};
use std::sync::Arc;

fn scripted_with_error() -> Arc<dyn AcpRuntime> {
    Arc::new(ScriptedRuntime::new("scripted").on_prompt(
        "conformance error",
        vec![TurnEvent::Error {
            message: "scripted failure".into(),
            code: Some("ACP_TURN_FAILED".into()),
            retryable: Some(false),
        }],
    ))
}

#[tokio::test]
async fn test_scripted_runtime_conforms() {
    let report = run_adapter_conformance(
        || Arc::new(ScriptedRuntime::new("scripted")) as Arc<dyn AcpRuntime>,
        ConformanceOptions::default(),
    )
    .await
    .expect("scripted runtime conforms");

    assert_eq!(report.backend, "scripted");
    assert!(report.success_events >= 1);
    assert!(report.status_probed);
    assert!(report.mode_set);
    assert!(report.config_set);
    assert!(report.error.is_none());
}

#[tokio::test]
async fn test_scripted_runtime_error_step() {
    let options = ConformanceOptions {
        error_prompt: Some("conformance error".into()),
        ..ConformanceOptions::default()
    };
    let report = run_adapter_conformance(scripted_with_error, options)
        .await
        .expect("error turn is reported");

    let error = report.error.expect("error step ran");
    assert_eq!(error.code, AcpErrorCode::TurnFailed);
    assert_eq!(error.message, "scripted failure");
}

#[cfg(unix)]
mod process {
    use super::*;
    use acp_relay_core::{ProcessBackendConfig, ProcessRuntime};

    const AGENT_SCRIPT: &str = r#"read line
case "$line" in
  *"conformance error"*)
    printf '%s\n' '{"type":"error","message":"agent refused","code":"ACP_TURN_FAILED"}'
    ;;
  *)
    printf '%s\n' '{"type":"status","text":"thinking"}' '{"type":"text_delta","text":"pong"}' '{"type":"done","stopReason":"end_turn"}'
    ;;
esac"#;

    fn process_runtime() -> Arc<dyn AcpRuntime> {
        Arc::new(ProcessRuntime::new(
            ProcessBackendConfig::new("sh-agent", "sh").with_args(["-c", AGENT_SCRIPT]),
        ))
    }

    #[tokio::test]
    async fn test_process_runtime_conforms() {
        let options = ConformanceOptions {
            error_prompt: Some("conformance error".into()),
            ..ConformanceOptions::default()
        };
        let report = run_adapter_conformance(process_runtime, options)
            .await
            .expect("process runtime conforms");

        assert_eq!(report.backend, "sh-agent");
        assert_eq!(report.success_events, 3);
        assert!(!report.mode_set);
        let error = report.error.expect("error step ran");
        assert_eq!(error.message, "agent refused");
    }
}
