//! Pipeline graph data model.
//!
//! Leaf data structures only: nodes, their recognition/action variants and
//! parameter blocks, and the graph container. No behavior beyond accessors;
//! parsing lives in [`crate::parser`] and validation in [`crate::checker`].

use std::collections::HashMap;

use serde_json::Value;
use tapflow_protocols::{Rect, Target};

/// Discriminant of a node's recognition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecognitionKind {
    DirectHit,
    TemplateMatch,
    FeatureMatch,
    ColorMatch,
    Ocr,
    NeuralNetworkClassify,
    NeuralNetworkDetect,
    Custom,
}

impl RecognitionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DirectHit" => Some(Self::DirectHit),
            "TemplateMatch" => Some(Self::TemplateMatch),
            "FeatureMatch" => Some(Self::FeatureMatch),
            "ColorMatch" => Some(Self::ColorMatch),
            "OCR" => Some(Self::Ocr),
            "NeuralNetworkClassify" => Some(Self::NeuralNetworkClassify),
            "NeuralNetworkDetect" => Some(Self::NeuralNetworkDetect),
            "Custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DirectHit => "DirectHit",
            Self::TemplateMatch => "TemplateMatch",
            Self::FeatureMatch => "FeatureMatch",
            Self::ColorMatch => "ColorMatch",
            Self::Ocr => "OCR",
            Self::NeuralNetworkClassify => "NeuralNetworkClassify",
            Self::NeuralNetworkDetect => "NeuralNetworkDetect",
            Self::Custom => "Custom",
        }
    }
}

/// Result ordering rule for multi-hit recognitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    #[default]
    Horizontal,
    Vertical,
    Score,
    Area,
    Length,
    Random,
    Expected,
}

impl OrderBy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Horizontal" => Some(Self::Horizontal),
            "Vertical" => Some(Self::Vertical),
            "Score" => Some(Self::Score),
            "Area" => Some(Self::Area),
            "Length" => Some(Self::Length),
            "Random" => Some(Self::Random),
            "Expected" => Some(Self::Expected),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Horizontal => "Horizontal",
            Self::Vertical => "Vertical",
            Self::Score => "Score",
            Self::Area => "Area",
            Self::Length => "Length",
            Self::Random => "Random",
            Self::Expected => "Expected",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatchParam {
    pub roi: Target,
    pub roi_offset: Rect,
    pub templates: Vec<String>,
    /// One threshold per template; a single value broadcasts.
    pub thresholds: Vec<f64>,
    pub method: i32,
    pub green_mask: bool,
    pub order_by: OrderBy,
    pub index: i32,
}

impl Default for TemplateMatchParam {
    fn default() -> Self {
        Self {
            roi: Target::Anywhere,
            roi_offset: Rect::default(),
            templates: Vec::new(),
            thresholds: Vec::new(),
            method: 5,
            green_mask: false,
            order_by: OrderBy::Horizontal,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatchParam {
    pub roi: Target,
    pub roi_offset: Rect,
    pub templates: Vec<String>,
    pub count: i32,
    pub detector: String,
    pub ratio: f64,
    pub green_mask: bool,
    pub order_by: OrderBy,
    pub index: i32,
}

impl Default for FeatureMatchParam {
    fn default() -> Self {
        Self {
            roi: Target::Anywhere,
            roi_offset: Rect::default(),
            templates: Vec::new(),
            count: 4,
            detector: "SIFT".to_string(),
            ratio: 0.6,
            green_mask: false,
            order_by: OrderBy::Horizontal,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColorMatchParam {
    pub roi: Target,
    pub roi_offset: Rect,
    /// Paired lower/upper channel bounds; lengths must match.
    pub lower: Vec<Vec<i32>>,
    pub upper: Vec<Vec<i32>>,
    pub method: i32,
    pub count: i32,
    pub connected: bool,
    pub order_by: OrderBy,
    pub index: i32,
}

impl Default for ColorMatchParam {
    fn default() -> Self {
        Self {
            roi: Target::Anywhere,
            roi_offset: Rect::default(),
            lower: Vec::new(),
            upper: Vec::new(),
            method: 4,
            count: 1,
            connected: false,
            order_by: OrderBy::Horizontal,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrParam {
    pub roi: Target,
    pub roi_offset: Rect,
    /// Regex patterns; a hit requires at least one to match.
    pub expected: Vec<String>,
    pub threshold: f64,
    /// Pattern/replacement pairs applied to recognized text before matching.
    pub replace: Vec<(String, String)>,
    pub only_rec: bool,
    pub model: String,
    pub order_by: OrderBy,
    pub index: i32,
}

impl Default for OcrParam {
    fn default() -> Self {
        Self {
            roi: Target::Anywhere,
            roi_offset: Rect::default(),
            expected: Vec::new(),
            threshold: 0.3,
            replace: Vec::new(),
            only_rec: false,
            model: String::new(),
            order_by: OrderBy::Horizontal,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeuralNetworkClassifyParam {
    pub roi: Target,
    pub roi_offset: Rect,
    pub model: String,
    pub labels: Vec<String>,
    /// Class indices that count as a hit.
    pub expected: Vec<i32>,
    pub order_by: OrderBy,
    pub index: i32,
}

impl Default for NeuralNetworkClassifyParam {
    fn default() -> Self {
        Self {
            roi: Target::Anywhere,
            roi_offset: Rect::default(),
            model: String::new(),
            labels: Vec::new(),
            expected: Vec::new(),
            order_by: OrderBy::Horizontal,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NeuralNetworkDetectParam {
    pub roi: Target,
    pub roi_offset: Rect,
    pub model: String,
    pub labels: Vec<String>,
    pub expected: Vec<i32>,
    /// One threshold per expected label; a single value broadcasts.
    pub thresholds: Vec<f64>,
    pub order_by: OrderBy,
    pub index: i32,
}

impl Default for NeuralNetworkDetectParam {
    fn default() -> Self {
        Self {
            roi: Target::Anywhere,
            roi_offset: Rect::default(),
            model: String::new(),
            labels: Vec::new(),
            expected: Vec::new(),
            thresholds: Vec::new(),
            order_by: OrderBy::Horizontal,
            index: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomRecognitionParam {
    /// Registered callback name; required, non-empty.
    pub name: String,
    pub param: Value,
    pub roi: Target,
    pub roi_offset: Rect,
}

/// A node's recognition step with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    DirectHit,
    TemplateMatch(TemplateMatchParam),
    FeatureMatch(FeatureMatchParam),
    ColorMatch(ColorMatchParam),
    Ocr(OcrParam),
    NeuralNetworkClassify(NeuralNetworkClassifyParam),
    NeuralNetworkDetect(NeuralNetworkDetectParam),
    Custom(CustomRecognitionParam),
}

impl Recognition {
    pub fn kind(&self) -> RecognitionKind {
        match self {
            Self::DirectHit => RecognitionKind::DirectHit,
            Self::TemplateMatch(_) => RecognitionKind::TemplateMatch,
            Self::FeatureMatch(_) => RecognitionKind::FeatureMatch,
            Self::ColorMatch(_) => RecognitionKind::ColorMatch,
            Self::Ocr(_) => RecognitionKind::Ocr,
            Self::NeuralNetworkClassify(_) => RecognitionKind::NeuralNetworkClassify,
            Self::NeuralNetworkDetect(_) => RecognitionKind::NeuralNetworkDetect,
            Self::Custom(_) => RecognitionKind::Custom,
        }
    }

    /// Region of interest, where the variant has one.
    pub fn roi(&self) -> (Target, Rect) {
        match self {
            Self::DirectHit => (Target::Anywhere, Rect::default()),
            Self::TemplateMatch(p) => (p.roi.clone(), p.roi_offset),
            Self::FeatureMatch(p) => (p.roi.clone(), p.roi_offset),
            Self::ColorMatch(p) => (p.roi.clone(), p.roi_offset),
            Self::Ocr(p) => (p.roi.clone(), p.roi_offset),
            Self::NeuralNetworkClassify(p) => (p.roi.clone(), p.roi_offset),
            Self::NeuralNetworkDetect(p) => (p.roi.clone(), p.roi_offset),
            Self::Custom(p) => (p.roi.clone(), p.roi_offset),
        }
    }
}

impl Default for Recognition {
    fn default() -> Self {
        Self::DirectHit
    }
}

/// Discriminant of a node's action step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    DoNothing,
    Click,
    LongPress,
    Swipe,
    MultiSwipe,
    Key,
    InputText,
    StartApp,
    StopApp,
    Command,
    Custom,
    StopTask,
}

impl ActionKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "DoNothing" => Some(Self::DoNothing),
            "Click" => Some(Self::Click),
            "LongPress" => Some(Self::LongPress),
            "Swipe" => Some(Self::Swipe),
            "MultiSwipe" => Some(Self::MultiSwipe),
            "Key" => Some(Self::Key),
            "InputText" => Some(Self::InputText),
            "StartApp" => Some(Self::StartApp),
            "StopApp" => Some(Self::StopApp),
            "Command" => Some(Self::Command),
            "Custom" => Some(Self::Custom),
            "StopTask" => Some(Self::StopTask),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::DoNothing => "DoNothing",
            Self::Click => "Click",
            Self::LongPress => "LongPress",
            Self::Swipe => "Swipe",
            Self::MultiSwipe => "MultiSwipe",
            Self::Key => "Key",
            Self::InputText => "InputText",
            Self::StartApp => "StartApp",
            Self::StopApp => "StopApp",
            Self::Command => "Command",
            Self::Custom => "Custom",
            Self::StopTask => "StopTask",
        }
    }
}

/// Where an action lands.
///
/// `Target::Anywhere` means "this node's own recognition box" in action
/// position (for a recognition ROI it means the whole frame).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClickParam {
    pub target: Target,
    pub target_offset: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LongPressParam {
    pub target: Target,
    pub target_offset: Rect,
    pub duration: u32,
}

impl Default for LongPressParam {
    fn default() -> Self {
        Self {
            target: Target::Anywhere,
            target_offset: Rect::default(),
            duration: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwipeParam {
    pub begin: Target,
    pub begin_offset: Rect,
    pub end: Target,
    pub end_offset: Rect,
    pub duration: u32,
    /// Delay before this swipe starts, used by MultiSwipe.
    pub starting: u32,
}

impl Default for SwipeParam {
    fn default() -> Self {
        Self {
            begin: Target::Anywhere,
            begin_offset: Rect::default(),
            end: Target::Anywhere,
            end_offset: Rect::default(),
            duration: 200,
            starting: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultiSwipeParam {
    pub swipes: Vec<SwipeParam>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyParam {
    pub keys: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputTextParam {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppParam {
    pub package: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandParam {
    pub exec: String,
    pub args: Vec<String>,
    pub detach: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CustomActionParam {
    /// Registered callback name; required, non-empty.
    pub name: String,
    pub param: Value,
    pub target: Target,
    pub target_offset: Rect,
}

/// A node's action step with its parameters.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Action {
    #[default]
    DoNothing,
    Click(ClickParam),
    LongPress(LongPressParam),
    Swipe(SwipeParam),
    MultiSwipe(MultiSwipeParam),
    Key(KeyParam),
    InputText(InputTextParam),
    StartApp(AppParam),
    StopApp(AppParam),
    Command(CommandParam),
    Custom(CustomActionParam),
    StopTask,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::DoNothing => ActionKind::DoNothing,
            Self::Click(_) => ActionKind::Click,
            Self::LongPress(_) => ActionKind::LongPress,
            Self::Swipe(_) => ActionKind::Swipe,
            Self::MultiSwipe(_) => ActionKind::MultiSwipe,
            Self::Key(_) => ActionKind::Key,
            Self::InputText(_) => ActionKind::InputText,
            Self::StartApp(_) => ActionKind::StartApp,
            Self::StopApp(_) => ActionKind::StopApp,
            Self::Command(_) => ActionKind::Command,
            Self::Custom(_) => ActionKind::Custom,
            Self::StopTask => ActionKind::StopTask,
        }
    }
}

/// Screen-stability gate configuration. `time == 0` disables the gate.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitFreezes {
    /// How long the region must stay visually unchanged, in ms.
    pub time: u64,
    pub target: Target,
    pub target_offset: Rect,
    pub threshold: f64,
    pub method: i32,
    /// Minimum interval between comparison captures, in ms.
    pub rate_limit: u64,
    /// Give-up bound; expiring is not a failure.
    pub timeout: u64,
}

impl Default for WaitFreezes {
    fn default() -> Self {
        Self {
            time: 0,
            target: Target::Anywhere,
            target_offset: Rect::default(),
            threshold: 0.95,
            method: 5,
            rate_limit: 1000,
            timeout: 20_000,
        }
    }
}

impl WaitFreezes {
    pub fn enabled(&self) -> bool {
        self.time > 0
    }
}

/// One named step of the automation graph.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineNode {
    pub name: String,
    pub recognition: Recognition,
    pub action: Action,
    /// Candidate successors, swept in order after this node's action.
    pub next: Vec<String>,
    /// Out-of-band candidates tried after `next` yields no hit.
    pub interrupt: Vec<String>,
    /// Prioritized fallbacks when the action fails.
    pub on_error: Vec<String>,
    /// Sub-nodes cannot be posted as task entries.
    pub is_sub: bool,
    pub inverse: bool,
    pub enabled: bool,
    /// Minimum interval between evaluations of this node, in ms.
    pub rate_limit: u64,
    /// Wall-clock ceiling on one recognition sweep, in ms.
    pub reco_timeout: u64,
    pub pre_delay: u64,
    pub post_delay: u64,
    pub pre_wait_freezes: WaitFreezes,
    pub post_wait_freezes: WaitFreezes,
    /// Opaque payload surfaced through execution events.
    pub focus: Value,
}

impl Default for PipelineNode {
    fn default() -> Self {
        Self {
            name: String::new(),
            recognition: Recognition::DirectHit,
            action: Action::DoNothing,
            next: Vec::new(),
            interrupt: Vec::new(),
            on_error: Vec::new(),
            is_sub: false,
            inverse: false,
            enabled: true,
            rate_limit: 1000,
            reco_timeout: 20_000,
            pre_delay: 200,
            post_delay: 200,
            pre_wait_freezes: WaitFreezes::default(),
            post_wait_freezes: WaitFreezes::default(),
            focus: Value::Null,
        }
    }
}

/// Node-name keyed graph. Lookup is unordered; `order` remembers first-load
/// order for listing, with later bundles overriding in place.
#[derive(Debug, Clone, Default)]
pub struct PipelineGraph {
    nodes: HashMap<String, PipelineNode>,
    order: Vec<String>,
}

impl PipelineGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&PipelineNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn insert(&mut self, node: PipelineNode) {
        if !self.nodes.contains_key(&node.name) {
            self.order.push(node.name.clone());
        }
        self.nodes.insert(node.name.clone(), node);
    }

    /// Node names in first-load order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PipelineNode)> {
        self.nodes.iter()
    }
}
