use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::container::ServiceContainer;
use crate::event_bus::EventBus;
use crate::registry::StepRegistry;
use crate::runtimes::{InMemoryInstanceStore, LocalDriver, RuntimeConfig, TickInput, TickRunner};
use crate::step::{Step, StepContext, StepError, StepOutcome, StepResult, WaitSpec};
use crate::types::StepDescriptor;

/// Pretend cloud API; a volume reports attached after a few polls.
#[derive(Default)]
struct VolumeApi {
    polls: AtomicU32,
}

impl VolumeApi {
    fn poll_attached(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst) + 1 >= 2
    }
}

#[derive(Default)]
struct CreateVolume;

#[async_trait]
impl Step for CreateVolume {
    async fn start(&mut self, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        let size: u64 = ctx.payload.get("sizeGb")?.unwrap_or(10);
        ctx.report(format!("creating {size}GB volume")).await;
        ctx.payload.set_meta("volumeId", &"vol-0001")?;
        Ok(StepOutcome::Pass)
    }
}

#[derive(Default)]
struct AttachVolume;

#[async_trait]
impl Step for AttachVolume {
    async fn start(&mut self, _ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        Ok(WaitSpec::seconds(1)
            .max_attempts(5)
            .until("is_attached")
            .then_call("record_attachment")
            .into())
    }

    async fn check(&mut self, method: &str, ctx: &mut StepContext<'_>) -> StepResult<bool> {
        match method {
            "is_attached" => Ok(ctx.container.must_get::<VolumeApi>()?.poll_attached()),
            other => Err(StepError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }

    async fn call(&mut self, method: &str, ctx: &mut StepContext<'_>) -> StepResult<StepOutcome> {
        match method {
            "record_attachment" => {
                let volume: String = ctx.payload.must_get("volumeId")?;
                ctx.payload.set_output("attached", &volume)?;
                Ok(StepOutcome::Pass)
            }
            other => Err(StepError::UnknownMethod {
                method: other.to_string(),
            }),
        }
    }
}

/// Demonstration run showcasing:
/// 1. Registering step templates and a workflow definition
/// 2. A polling step paused with a `WaitSpec` and resumed by its check
/// 3. Lifecycle events mirrored to stdout through the event bus
pub async fn run_demo(config: RuntimeConfig) -> miette::Result<()> {
    println!("== Demo: provision volume ==");

    let mut registry = StepRegistry::new();
    registry.register_default::<CreateVolume>("create-volume", 1)?;
    registry.register_default::<AttachVolume>("attach-volume", 1)?;

    let instances = Arc::new(InMemoryInstanceStore::new());
    instances.define(
        "provision",
        1,
        vec![
            StepDescriptor::new(0, "create-volume", 1),
            StepDescriptor::new(1, "attach-volume", 1),
        ],
    )?;

    let bus = EventBus::default();
    bus.listen_for_events();
    let runner = TickRunner::new(registry, instances.clone())
        .with_container(ServiceContainer::new().with(VolumeApi::default()))
        .with_config(config)
        .with_event_bus(&bus);

    let report = LocalDriver::new(&runner)
        .drive(TickInput::trigger("provision", 1, json!({"sizeGb": 20})))
        .await;
    bus.stop_listener().await;
    let report = report?;

    println!("\nDecisions: {:?}", report.decisions);
    println!("Output: {}", report.last.wp["output"]);
    let id = report.session_id.as_deref().unwrap_or_default();
    if let Some(instance) = instances.get(id)? {
        println!("Instance {id}: {:?} (revision {})", instance.status, instance.revision);
        for (i, record) in instance.step_records.iter().enumerate() {
            println!(
                "  step {i}: {:?} {}",
                record.status,
                record.message.as_deref().unwrap_or("")
            );
        }
    }
    println!("== Demo complete ==");
    Ok(())
}
