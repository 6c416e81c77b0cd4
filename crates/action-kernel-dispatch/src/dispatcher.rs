//! Action dispatcher
//!
//! Drives one call through the dispatch state machine: handler and contract
//! resolution, policy, input validation, sandboxed execution and output
//! validation. Every outcome, including failures, is folded into an
//! [`Envelope`].

use action_kernel_policy::{CallerIdentity, PolicyDecision, PolicyRequest};
use action_kernel_registry::ActionContract;
use action_kernel_schema::{SchemaSide, Validator};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::action::ActionId;
use crate::context::KernelContext;
use crate::envelope::{Envelope, EnvelopeMeta, ErrorInfo};
use crate::error::{KernelError, KernelResult, ValidationStage};
use crate::handler::ActionHandler;
use crate::sandbox::{FrozenValue, Sandbox, SandboxContext};
use crate::state::{DispatchState, StateTracker};

/// Contract chosen for a call plus the scope it came from
struct ResolvedContract {
    contract: ActionContract,
    scope: &'static str,
}

struct Validators {
    input: Arc<Validator>,
    output: Arc<Validator>,
}

/// Per-call bookkeeping surfaced in the envelope meta
struct CallState {
    tracker: StateTracker,
    contract_version: Option<u32>,
}

pub struct Dispatcher {
    context: Arc<KernelContext>,
    sandbox: Sandbox,
}

impl Dispatcher {
    pub fn new(context: Arc<KernelContext>) -> Self {
        Self {
            context,
            sandbox: Sandbox::new(),
        }
    }

    pub fn context(&self) -> &KernelContext {
        &self.context
    }

    /// Dispatch one call; never fails, errors are reported in the envelope
    pub async fn dispatch(&self, action_id: &str, input: Value, caller: &CallerIdentity) -> Envelope {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let mut call = CallState {
            tracker: StateTracker::new(action_id),
            contract_version: None,
        };

        let result = self.run(action_id, input, caller, &request_id, &mut call).await;

        if let Err(err) = &result {
            let terminal = terminal_state(err, call.tracker.state());
            call.tracker.advance(terminal);
        }

        let meta = EnvelopeMeta {
            execution_time_ms: started.elapsed().as_millis() as u64,
            state: call.tracker.state(),
            request_id,
            action_id: action_id.to_string(),
            contract_version: call.contract_version,
        };

        match result {
            Ok(data) => {
                tracing::info!(
                    action_id = %action_id,
                    request_id = %meta.request_id,
                    tenant_id = ?caller.tenant(),
                    duration_ms = meta.execution_time_ms,
                    "Action completed"
                );
                Envelope::success(data, meta)
            }
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(
                        action_id = %action_id,
                        request_id = %meta.request_id,
                        code = err.code(),
                        error = %err,
                        "Action failed"
                    );
                } else {
                    tracing::warn!(
                        action_id = %action_id,
                        request_id = %meta.request_id,
                        tenant_id = ?caller.tenant(),
                        code = err.code(),
                        state = %meta.state,
                        "Action rejected"
                    );
                }
                Envelope::failure(self.error_info(&err), meta)
            }
        }
    }

    async fn run(
        &self,
        action_id: &str,
        input: Value,
        caller: &CallerIdentity,
        request_id: &str,
        call: &mut CallState,
    ) -> KernelResult<FrozenValue> {
        let id = ActionId::parse(action_id)?;
        let handler = self
            .context
            .engines()
            .resolve(&id)
            .ok_or_else(|| KernelError::ActionNotFound(action_id.to_string()))?;

        let violations = self.sandbox.inspect(handler.as_ref());
        if !violations.is_empty() {
            return Err(KernelError::SecurityViolation(violations));
        }

        let resolved = self.resolve_contract(caller.tenant(), action_id, handler.as_ref()).await?;
        call.contract_version = Some(resolved.contract.version);
        let validators = self.validators_for(caller.tenant(), &resolved)?;
        let contract = &resolved.contract;

        call.tracker.advance(DispatchState::PolicyCheck);
        let decision = self
            .context
            .policy()
            .evaluate(PolicyRequest {
                action_id,
                contract,
                caller,
                input: &input,
            })
            .await?;
        let approval = match decision {
            PolicyDecision::Allow { approval } => approval,
            PolicyDecision::Deny(denial) => return Err(denial.into()),
        };

        let validated = validators
            .input
            .validate(&input)
            .into_result()
            .map_err(|issues| KernelError::Validation {
                stage: ValidationStage::Input,
                issues,
            })?;
        call.tracker.advance(DispatchState::InputValidated);

        call.tracker.advance(DispatchState::Executing);
        let sandbox_ctx = SandboxContext::new(
            caller.tenant(),
            &caller.actor_id,
            action_id,
            request_id,
            self.context.capabilities(),
        )
        .with_approval(approval);
        let output = self
            .sandbox
            .run(handler, sandbox_ctx, validated)
            .await
            .map_err(KernelError::ExecutionFailed)?;

        let data = validators
            .output
            .validate(&output)
            .into_result()
            .map_err(|issues| KernelError::Validation {
                stage: ValidationStage::Output,
                issues,
            })?;
        call.tracker.advance(DispatchState::OutputValidated);
        call.tracker.advance(DispatchState::Completed);

        // unchanged outputs keep the handler's frozen value
        if data == *output {
            Ok(output)
        } else {
            Ok(Arc::new(data))
        }
    }

    /// Active registry record for the caller's scope, else the handler's own contract
    async fn resolve_contract(
        &self,
        tenant_id: Option<&str>,
        action_id: &str,
        handler: &dyn ActionHandler,
    ) -> KernelResult<ResolvedContract> {
        if let Some(contract) = self.context.registry().resolve_action(tenant_id, action_id).await? {
            return Ok(ResolvedContract {
                contract,
                scope: if tenant_id.is_some() { "tenant" } else { "global" },
            });
        }

        match handler.contract() {
            Some(contract) => {
                tracing::debug!(action_id = %action_id, "Using built-in contract");
                Ok(ResolvedContract {
                    contract,
                    scope: "builtin",
                })
            }
            None => Err(KernelError::ContractNotFound(action_id.to_string())),
        }
    }

    fn validators_for(&self, tenant_id: Option<&str>, resolved: &ResolvedContract) -> KernelResult<Validators> {
        let contract = &resolved.contract;
        let cache_id = match resolved.scope {
            "tenant" => format!("tenant:{}:{}", tenant_id.unwrap_or_default(), contract.id),
            scope => format!("{}:{}", scope, contract.id),
        };

        let cache = self.context.validators();
        Ok(Validators {
            input: cache.get_or_compile(
                &cache_id,
                contract.version,
                SchemaSide::Input,
                contract.input_schema.as_ref(),
            )?,
            output: cache.get_or_compile(
                &cache_id,
                contract.version,
                SchemaSide::Output,
                contract.output_schema.as_ref(),
            )?,
        })
    }

    fn error_info(&self, err: &KernelError) -> ErrorInfo {
        let info = ErrorInfo::new(err.code(), err.public_message());
        let details = match (err.details(), self.context.dev_diagnostics() && err.is_internal()) {
            (Some(mut details), true) => {
                if let Some(map) = details.as_object_mut() {
                    map.insert("diagnostics".to_string(), json!(err.to_string()));
                }
                Some(details)
            }
            (None, true) => Some(json!({ "diagnostics": err.to_string() })),
            (details, false) => details,
        };
        match details {
            Some(details) => info.with_details(details),
            None => info,
        }
    }
}

fn terminal_state(err: &KernelError, current: DispatchState) -> DispatchState {
    match err {
        KernelError::Validation {
            stage: ValidationStage::Input,
            ..
        } => DispatchState::InputInvalid,
        KernelError::Validation {
            stage: ValidationStage::Output,
            ..
        } => DispatchState::OutputInvalid,
        KernelError::ExecutionFailed(_) if current == DispatchState::Executing => DispatchState::ExecFailed,
        _ => DispatchState::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineRegistry};
    use crate::handler::{handler_fn, HandlerError};
    use action_kernel_registry::{
        ActionKind, ContractRecord, ContractRegistry, ContractStatus, MemoryContractStore,
    };

    fn contract() -> ActionContract {
        ActionContract::new("demo.sum", 1, ActionKind::Query)
            .with_input_schema(json!({
                "type": "object",
                "definition": {"shape": {
                    "a": {"type": "number"},
                    "b": {"type": "number"}
                }}
            }))
            .with_output_schema(json!({
                "type": "object",
                "definition": {"shape": {"total": {"type": "number"}}}
            }))
    }

    fn caller() -> CallerIdentity {
        CallerIdentity::new(Some("t1"), "alice").with_permissions(["execute_action"])
    }

    fn dispatcher_with(engine: Engine, registry: Arc<ContractRegistry>, dev: bool) -> Dispatcher {
        let engines = EngineRegistry::new().with_engine(engine).unwrap();
        let context = KernelContext::new(registry, engines).with_dev_diagnostics(dev);
        Dispatcher::new(Arc::new(context))
    }

    fn sum_engine() -> Engine {
        Engine::new("demo").handler(
            "demo.sum",
            handler_fn(Some(contract()), |_ctx, input| async move {
                let total = input["a"].as_f64().unwrap_or(0.0) + input["b"].as_f64().unwrap_or(0.0);
                Ok(json!({"total": total, "debug": "stripped"}))
            }),
        )
    }

    #[tokio::test]
    async fn test_happy_path_strips_unknown_keys() {
        let dispatcher = dispatcher_with(sum_engine(), Arc::new(ContractRegistry::reduced()), false);
        let envelope = dispatcher
            .dispatch("demo.sum", json!({"a": 1, "b": 2, "extra": true}), &caller())
            .await;

        assert!(envelope.success, "{:?}", envelope.error);
        assert_eq!(*envelope.data.unwrap(), json!({"total": 3.0}));
        assert_eq!(envelope.meta.state, DispatchState::Completed);
        assert_eq!(envelope.meta.contract_version, Some(1));
    }

    #[tokio::test]
    async fn test_unknown_action() {
        let dispatcher = dispatcher_with(sum_engine(), Arc::new(ContractRegistry::reduced()), false);
        let envelope = dispatcher.dispatch("demo.missing", json!({}), &caller()).await;
        assert_eq!(envelope.code(), Some("ACTION_NOT_FOUND"));
        assert_eq!(envelope.meta.state, DispatchState::Denied);

        let envelope = dispatcher.dispatch("not-an-id", json!({}), &caller()).await;
        assert_eq!(envelope.code(), Some("ACTION_NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_input_invalid() {
        let dispatcher = dispatcher_with(sum_engine(), Arc::new(ContractRegistry::reduced()), false);
        let envelope = dispatcher.dispatch("demo.sum", json!({"a": "one", "b": 2}), &caller()).await;
        assert_eq!(envelope.code(), Some("INPUT_INVALID"));
        assert_eq!(envelope.meta.state, DispatchState::InputInvalid);
        let issues = &envelope.error.unwrap().details.unwrap()["issues"];
        assert_eq!(issues[0]["path"], "$.a");
    }

    #[tokio::test]
    async fn test_registry_record_overrides_builtin_contract() {
        let store = Arc::new(MemoryContractStore::new());
        let registry = Arc::new(ContractRegistry::new(store));
        let mut v2 = contract();
        v2.version = 2;
        v2.output_schema = Some(json!({
            "type": "object",
            "definition": {"shape": {"total": {"type": "string"}}}
        }));
        let record = ContractRecord::from_action(Some("t1"), &v2)
            .unwrap()
            .with_status(ContractStatus::Active);
        registry.register(record, false).await.unwrap();

        let dispatcher = dispatcher_with(sum_engine(), registry, false);
        let envelope = dispatcher.dispatch("demo.sum", json!({"a": 1, "b": 2}), &caller()).await;
        assert_eq!(envelope.code(), Some("OUTPUT_INVALID"));
        assert_eq!(envelope.meta.state, DispatchState::OutputInvalid);
        assert_eq!(envelope.meta.contract_version, Some(2));

        // other tenants still see the built-in contract
        let other = CallerIdentity::new(Some("t2"), "bob").with_permissions(["execute_action"]);
        let envelope = dispatcher.dispatch("demo.sum", json!({"a": 1, "b": 2}), &other).await;
        assert!(envelope.success);
        assert_eq!(envelope.meta.contract_version, Some(1));
    }

    #[tokio::test]
    async fn test_handler_failure_is_generic_unless_dev() {
        let engine = || {
            Engine::new("demo").handler(
                "demo.sum",
                handler_fn(Some(contract()), |_ctx, _input| async move {
                    Err(HandlerError::failed("connection refused at 10.0.0.7"))
                }),
            )
        };

        let dispatcher = dispatcher_with(engine(), Arc::new(ContractRegistry::reduced()), false);
        let envelope = dispatcher.dispatch("demo.sum", json!({"a": 1, "b": 2}), &caller()).await;
        let error = envelope.error.unwrap();
        assert_eq!(error.code, "INTERNAL_ERROR");
        assert_eq!(error.message, "Action execution failed");
        assert!(error.details.is_none());
        assert_eq!(envelope.meta.state, DispatchState::ExecFailed);

        let dispatcher = dispatcher_with(engine(), Arc::new(ContractRegistry::reduced()), true);
        let envelope = dispatcher.dispatch("demo.sum", json!({"a": 1, "b": 2}), &caller()).await;
        let details = envelope.error.unwrap().details.unwrap();
        assert!(details["diagnostics"].as_str().unwrap().contains("10.0.0.7"));
    }

    #[test]
    fn test_terminal_state_mapping() {
        let exec = KernelError::ExecutionFailed("x".into());
        assert_eq!(terminal_state(&exec, DispatchState::Executing), DispatchState::ExecFailed);
        assert_eq!(terminal_state(&exec, DispatchState::PolicyCheck), DispatchState::Denied);
        let missing = KernelError::ContractNotFound("x".into());
        assert_eq!(terminal_state(&missing, DispatchState::Received), DispatchState::Denied);
    }
}
