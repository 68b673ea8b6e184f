//! Action stage: resolves targets and drives the bound controller.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use tapflow_pipeline::{Action, ActionKind, PipelineNode};
use tapflow_protocols::{
    ContextApi, Controller, CustomActionArg, RecoId, RecoResult, Rect, Target, TaskId,
};

use crate::bank::ResultBank;
use crate::cache::RecoCache;
use crate::resource::Resource;

/// Resolves declarative targets to concrete screen rectangles.
///
/// `Target::Anywhere` in action position means "this node's own recognition
/// box"; `Target::Node` looks up the named node's latest cached hit.
pub struct TargetResolver {
    bank: Arc<ResultBank>,
    cache: Arc<RecoCache>,
}

impl TargetResolver {
    pub fn new(bank: Arc<ResultBank>, cache: Arc<RecoCache>) -> Self {
        Self { bank, cache }
    }

    pub fn resolve(&self, target: &Target, offset: Rect, self_box: Rect) -> Rect {
        let base = match target {
            Target::Anywhere => self_box,
            Target::Region(r) => *r,
            Target::Node(name) => self
                .bank
                .latest_node(name)
                .and_then(|id| self.bank.node(id))
                .and_then(|n| self.cache.get(n.reco_id))
                .map(|r| r.hit_box)
                .unwrap_or(self_box),
        };
        base.offset_by(offset)
    }
}

/// One action type's executor.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn perform(
        &self,
        controller: &dyn Controller,
        action: &Action,
        self_box: Rect,
        resolver: &TargetResolver,
    ) -> bool;
}

/// Default actuator: forwards every built-in action to the controller.
pub struct ControllerActuator;

#[async_trait]
impl Actuator for ControllerActuator {
    async fn perform(
        &self,
        controller: &dyn Controller,
        action: &Action,
        self_box: Rect,
        resolver: &TargetResolver,
    ) -> bool {
        match action {
            Action::DoNothing | Action::StopTask => true,
            Action::Click(p) => {
                let (x, y) = resolver.resolve(&p.target, p.target_offset, self_box).center();
                controller.click(x, y).await
            }
            Action::LongPress(p) => {
                // Modeled as a zero-length swipe held for the duration.
                let (x, y) = resolver.resolve(&p.target, p.target_offset, self_box).center();
                controller.swipe(x, y, x, y, p.duration).await
            }
            Action::Swipe(p) => {
                let (x1, y1) = resolver.resolve(&p.begin, p.begin_offset, self_box).center();
                let (x2, y2) = resolver.resolve(&p.end, p.end_offset, self_box).center();
                controller.swipe(x1, y1, x2, y2, p.duration).await
            }
            Action::MultiSwipe(p) => {
                let mut ok = true;
                for swipe in &p.swipes {
                    if swipe.starting > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(swipe.starting as u64))
                            .await;
                    }
                    let (x1, y1) = resolver.resolve(&swipe.begin, swipe.begin_offset, self_box).center();
                    let (x2, y2) = resolver.resolve(&swipe.end, swipe.end_offset, self_box).center();
                    ok &= controller.swipe(x1, y1, x2, y2, swipe.duration).await;
                }
                ok
            }
            Action::Key(p) => {
                let mut ok = true;
                for key in &p.keys {
                    ok &= controller.press_key(*key).await;
                }
                ok
            }
            Action::InputText(p) => controller.input_text(&p.text).await,
            Action::StartApp(p) => controller.start_app(&p.package).await,
            Action::StopApp(p) => controller.stop_app(&p.package).await,
            Action::Command(p) => {
                let mut cmd = p.exec.clone();
                for arg in &p.args {
                    cmd.push(' ');
                    cmd.push_str(arg);
                }
                controller.shell(&cmd, 20_000).await.is_some()
            }
            // Dispatched by the stage, never by an actuator.
            Action::Custom(_) => false,
        }
    }
}

/// Runs one node's action step.
pub struct ActionStage {
    actuators: Arc<ActuatorRegistry>,
    resolver: TargetResolver,
    resource: Arc<Resource>,
}

/// Registry of actuators keyed on the action type tag.
pub struct ActuatorRegistry {
    map: DashMap<ActionKind, Arc<dyn Actuator>>,
}

impl Default for ActuatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorRegistry {
    pub fn new() -> Self {
        let default: Arc<dyn Actuator> = Arc::new(ControllerActuator);
        let map: DashMap<ActionKind, Arc<dyn Actuator>> = DashMap::new();
        for kind in [
            ActionKind::DoNothing,
            ActionKind::Click,
            ActionKind::LongPress,
            ActionKind::Swipe,
            ActionKind::MultiSwipe,
            ActionKind::Key,
            ActionKind::InputText,
            ActionKind::StartApp,
            ActionKind::StopApp,
            ActionKind::Command,
        ] {
            map.insert(kind, default.clone());
        }
        Self { map }
    }

    pub fn register(&self, kind: ActionKind, actuator: Arc<dyn Actuator>) {
        self.map.insert(kind, actuator);
    }

    pub fn get(&self, kind: ActionKind) -> Option<Arc<dyn Actuator>> {
        self.map.get(&kind).map(|a| a.clone())
    }
}

impl ActionStage {
    pub fn new(
        actuators: Arc<ActuatorRegistry>,
        bank: Arc<ResultBank>,
        cache: Arc<RecoCache>,
        resource: Arc<Resource>,
    ) -> Self {
        Self {
            actuators,
            resolver: TargetResolver::new(bank, cache),
            resource,
        }
    }

    pub fn resolver(&self) -> &TargetResolver {
        &self.resolver
    }

    /// Execute `node`'s action given the recognition that triggered it.
    /// Failures are in-band: `false`, never a panic or an escaping error.
    pub async fn execute(
        &self,
        task_id: TaskId,
        node: &PipelineNode,
        controller: &dyn Controller,
        reco_id: RecoId,
        reco: &RecoResult,
        ctx: &dyn ContextApi,
    ) -> bool {
        match &node.action {
            Action::DoNothing | Action::StopTask => true,
            Action::Custom(param) => {
                let Some(callback) = self.resource.custom_action(&param.name) else {
                    warn!(node = %node.name, callback = %param.name, "custom action not registered");
                    return false;
                };
                let hit_box = self
                    .resolver
                    .resolve(&param.target, param.target_offset, reco.hit_box);
                let arg = CustomActionArg {
                    task_id,
                    node_name: node.name.clone(),
                    custom_name: param.name.clone(),
                    custom_param: param.param.clone(),
                    reco_id,
                    hit_box,
                    reco_detail: reco.detail.clone(),
                };
                match callback.run(ctx, arg).await {
                    Ok(ok) => ok,
                    Err(e) => {
                        warn!(node = %node.name, callback = %param.name, error = %e, "custom action failed");
                        false
                    }
                }
            }
            other => {
                let kind = other.kind();
                let Some(actuator) = self.actuators.get(kind) else {
                    warn!(node = %node.name, kind = kind.name(), "no actuator registered");
                    return false;
                };
                debug!(node = %node.name, kind = kind.name(), "performing action");
                actuator
                    .perform(controller, other, reco.hit_box, &self.resolver)
                    .await
            }
        }
    }
}
