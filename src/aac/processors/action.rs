//! Semantic actions: vendor command vocabularies mapped onto one closed set of
//! intents.
//!
//! Each vendor describes "go to page", "clear the message bar" and friends
//! with its own structure. [`normalize`] derives an [`ActionIntent`] and the
//! generic parameters from such a structure and keeps the structure itself,
//! verbatim, under the platform's name. [`denormalize`] hands that structure
//! back unchanged when asked for the same platform, so a same-platform round
//! trip is lossless; any other platform gets the closest action its
//! vocabulary supports.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

/// Parameter holding the navigation target page id.
pub const PARAM_TARGET: &str = "target";
/// Parameter holding text to speak or insert.
pub const PARAM_TEXT: &str = "text";
/// Parameter holding a board path (Open Board archives).
pub const PARAM_PATH: &str = "path";
/// Parameter holding an audio identifier.
pub const PARAM_IDENTIFIER: &str = "identifier";

/// Closed enumeration of what a button does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionIntent {
    NavigateTo,
    GoBack,
    GoHome,
    Speak,
    SpeakCustom,
    InsertText,
    Clear,
    DeleteWord,
    DeleteCharacter,
    PlayAudio,
    Custom,
}

impl ActionIntent {
    /// Every intent, in declaration order.
    pub const ALL: [ActionIntent; 11] = [
        ActionIntent::NavigateTo,
        ActionIntent::GoBack,
        ActionIntent::GoHome,
        ActionIntent::Speak,
        ActionIntent::SpeakCustom,
        ActionIntent::InsertText,
        ActionIntent::Clear,
        ActionIntent::DeleteWord,
        ActionIntent::DeleteCharacter,
        ActionIntent::PlayAudio,
        ActionIntent::Custom,
    ];

    /// The category an intent belongs to.
    pub const fn category(self) -> ActionCategory {
        match self {
            ActionIntent::NavigateTo | ActionIntent::GoBack | ActionIntent::GoHome => {
                ActionCategory::Navigation
            }
            ActionIntent::Speak
            | ActionIntent::SpeakCustom
            | ActionIntent::InsertText
            | ActionIntent::PlayAudio => ActionCategory::Communication,
            ActionIntent::Clear | ActionIntent::DeleteWord | ActionIntent::DeleteCharacter => {
                ActionCategory::System
            }
            ActionIntent::Custom => ActionCategory::Custom,
        }
    }

    /// Stable name used in spreadsheets and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            ActionIntent::NavigateTo => "NAVIGATE_TO",
            ActionIntent::GoBack => "GO_BACK",
            ActionIntent::GoHome => "GO_HOME",
            ActionIntent::Speak => "SPEAK",
            ActionIntent::SpeakCustom => "SPEAK_CUSTOM",
            ActionIntent::InsertText => "INSERT_TEXT",
            ActionIntent::Clear => "CLEAR",
            ActionIntent::DeleteWord => "DELETE_WORD",
            ActionIntent::DeleteCharacter => "DELETE_CHARACTER",
            ActionIntent::PlayAudio => "PLAY_AUDIO",
            ActionIntent::Custom => "CUSTOM",
        }
    }

    /// Inverse of [`ActionIntent::as_str`].
    pub fn from_name(name: &str) -> Option<Self> {
        ActionIntent::ALL
            .into_iter()
            .find(|intent| intent.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for ActionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse grouping derived from the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCategory {
    Navigation,
    Communication,
    Custom,
    System,
}

/// Vendor vocabularies known to the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Grid3,
    Snap,
    TouchChat,
    Obf,
}

impl Platform {
    /// Key used in [`SemanticAction::platform_data`].
    pub const fn as_str(self) -> &'static str {
        match self {
            Platform::Grid3 => "grid3",
            Platform::Snap => "snap",
            Platform::TouchChat => "touchchat",
            Platform::Obf => "obf",
        }
    }
}

/// A normalized action: intent, derived category, generic parameters and the
/// original vendor structures keyed by platform name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticAction {
    pub intent: ActionIntent,
    pub category: ActionCategory,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default)]
    pub platform_data: BTreeMap<String, Value>,
}

impl SemanticAction {
    /// Creates an action without parameters; the category follows the intent.
    pub fn new(intent: ActionIntent) -> Self {
        Self {
            intent,
            category: intent.category(),
            parameters: BTreeMap::new(),
            platform_data: BTreeMap::new(),
        }
    }

    /// Shorthand for a navigation action.
    pub fn navigate_to(target: impl Into<String>) -> Self {
        Self::new(ActionIntent::NavigateTo).with_parameter(PARAM_TARGET, target.into())
    }

    /// Adds a generic parameter.
    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Navigation target, when present.
    pub fn target(&self) -> Option<&str> {
        self.parameters.get(PARAM_TARGET).and_then(Value::as_str)
    }

    /// Text payload, when present.
    pub fn text(&self) -> Option<&str> {
        self.parameters.get(PARAM_TEXT).and_then(Value::as_str)
    }

    /// Original structure recorded for `platform`, if the action came from it.
    pub fn platform_payload(&self, platform: Platform) -> Option<&Value> {
        self.platform_data.get(platform.as_str())
    }
}

/// Normalizes a vendor action into a [`SemanticAction`]. The whole vendor
/// structure is kept under `platform_data[platform]`.
pub fn normalize(vendor_action: &Value, platform: Platform) -> SemanticAction {
    let mut action = match platform {
        Platform::Grid3 => normalize_grid3(vendor_action),
        Platform::Snap => normalize_snap(vendor_action),
        Platform::TouchChat => normalize_touchchat(vendor_action),
        Platform::Obf => normalize_obf(vendor_action),
    };
    action
        .platform_data
        .insert(platform.as_str().to_string(), vendor_action.clone());
    debug!(platform = platform.as_str(), intent = %action.intent, "normalized vendor action");
    action
}

/// Produces a vendor action for `platform`: the recorded structure verbatim
/// when there is one, otherwise the closest action synthesized from intent and
/// parameters. Never fails; unsupported intents degrade to inserting or
/// speaking text.
pub fn denormalize(action: &SemanticAction, platform: Platform) -> Value {
    if let Some(original) = action.platform_payload(platform) {
        return original.clone();
    }
    let intent = degrade(action, platform);
    match platform {
        Platform::Grid3 => grid3_action(intent, action),
        Platform::Snap => snap_action(intent, action),
        Platform::TouchChat => touchchat_action(intent, action),
        Platform::Obf => obf_action(intent, action),
    }
}

fn degrade(action: &SemanticAction, platform: Platform) -> ActionIntent {
    match (action.intent, platform) {
        (ActionIntent::Custom, _) if action.text().is_some() => ActionIntent::InsertText,
        (ActionIntent::Custom, _) => ActionIntent::Speak,
        (ActionIntent::NavigateTo, _) if action.target().is_none() => ActionIntent::Speak,
        (ActionIntent::DeleteWord, Platform::Obf) => ActionIntent::DeleteCharacter,
        (ActionIntent::PlayAudio, Platform::Grid3 | Platform::Obf) => ActionIntent::Speak,
        (intent, _) => intent,
    }
}

fn text_param(action: &SemanticAction) -> String {
    action.text().unwrap_or_default().to_string()
}

fn target_param(action: &SemanticAction) -> String {
    action.target().unwrap_or_default().to_string()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn with_optional(action: SemanticAction, key: &str, value: Option<String>) -> SemanticAction {
    match value {
        Some(value) => action.with_parameter(key, value),
        None => action,
    }
}

// Grid 3: {"ID": "Jump.To", "Parameters": {"grid": "Food"}}

fn normalize_grid3(value: &Value) -> SemanticAction {
    let id = value.get("ID").and_then(Value::as_str).unwrap_or_default();
    let parameters = value.get("Parameters").cloned().unwrap_or(Value::Null);
    let text = string_field(&parameters, "text");
    match id {
        "Jump.To" => with_optional(
            SemanticAction::new(ActionIntent::NavigateTo),
            PARAM_TARGET,
            string_field(&parameters, "grid"),
        ),
        "Jump.Back" => SemanticAction::new(ActionIntent::GoBack),
        "Jump.Home" => SemanticAction::new(ActionIntent::GoHome),
        "Action.Speak" if text.is_some() => {
            with_optional(SemanticAction::new(ActionIntent::SpeakCustom), PARAM_TEXT, text)
        }
        "Action.Speak" => SemanticAction::new(ActionIntent::Speak),
        "Action.InsertText" => {
            with_optional(SemanticAction::new(ActionIntent::InsertText), PARAM_TEXT, text)
        }
        "Action.Clear" => SemanticAction::new(ActionIntent::Clear),
        "Action.DeleteWord" => SemanticAction::new(ActionIntent::DeleteWord),
        "Action.DeleteLetter" => SemanticAction::new(ActionIntent::DeleteCharacter),
        "Action.PlaySound" => with_optional(
            SemanticAction::new(ActionIntent::PlayAudio),
            PARAM_IDENTIFIER,
            string_field(&parameters, "sound"),
        ),
        _ => with_optional(SemanticAction::new(ActionIntent::Custom), PARAM_TEXT, text),
    }
}

fn grid3_command(id: &str, parameters: Option<(&str, String)>) -> Value {
    let mut command = Map::new();
    command.insert("ID".to_string(), Value::String(id.to_string()));
    if let Some((key, value)) = parameters {
        let mut params = Map::new();
        params.insert(key.to_string(), Value::String(value));
        command.insert("Parameters".to_string(), Value::Object(params));
    }
    Value::Object(command)
}

fn grid3_action(intent: ActionIntent, action: &SemanticAction) -> Value {
    match intent {
        ActionIntent::NavigateTo => grid3_command("Jump.To", Some(("grid", target_param(action)))),
        ActionIntent::GoBack => grid3_command("Jump.Back", None),
        ActionIntent::GoHome => grid3_command("Jump.Home", None),
        ActionIntent::SpeakCustom => grid3_command("Action.Speak", Some(("text", text_param(action)))),
        ActionIntent::InsertText => {
            grid3_command("Action.InsertText", Some(("text", text_param(action))))
        }
        ActionIntent::Clear => grid3_command("Action.Clear", None),
        ActionIntent::DeleteWord => grid3_command("Action.DeleteWord", None),
        ActionIntent::DeleteCharacter => grid3_command("Action.DeleteLetter", None),
        _ => grid3_command("Action.Speak", None),
    }
}

// Snap: {"$type": "NavigateCommand", "LinkedPageId": "..."}

fn normalize_snap(value: &Value) -> SemanticAction {
    let kind = value.get("$type").and_then(Value::as_str).unwrap_or_default();
    let text = string_field(value, "Text");
    match kind {
        "NavigateCommand" => with_optional(
            SemanticAction::new(ActionIntent::NavigateTo),
            PARAM_TARGET,
            string_field(value, "LinkedPageId"),
        ),
        "GoBackCommand" => SemanticAction::new(ActionIntent::GoBack),
        "GoHomeCommand" => SemanticAction::new(ActionIntent::GoHome),
        "SpeakCommand" if text.is_some() => {
            with_optional(SemanticAction::new(ActionIntent::SpeakCustom), PARAM_TEXT, text)
        }
        "SpeakCommand" => SemanticAction::new(ActionIntent::Speak),
        "InsertTextCommand" => {
            with_optional(SemanticAction::new(ActionIntent::InsertText), PARAM_TEXT, text)
        }
        "ClearCommand" => SemanticAction::new(ActionIntent::Clear),
        "DeleteWordCommand" => SemanticAction::new(ActionIntent::DeleteWord),
        "DeleteCharacterCommand" => SemanticAction::new(ActionIntent::DeleteCharacter),
        "PlayAudioCommand" => with_optional(
            SemanticAction::new(ActionIntent::PlayAudio),
            PARAM_IDENTIFIER,
            string_field(value, "Identifier"),
        ),
        _ => with_optional(SemanticAction::new(ActionIntent::Custom), PARAM_TEXT, text),
    }
}

fn snap_action(intent: ActionIntent, action: &SemanticAction) -> Value {
    match intent {
        ActionIntent::NavigateTo => {
            json!({ "$type": "NavigateCommand", "LinkedPageId": target_param(action) })
        }
        ActionIntent::GoBack => json!({ "$type": "GoBackCommand" }),
        ActionIntent::GoHome => json!({ "$type": "GoHomeCommand" }),
        ActionIntent::SpeakCustom => json!({ "$type": "SpeakCommand", "Text": text_param(action) }),
        ActionIntent::InsertText => {
            json!({ "$type": "InsertTextCommand", "Text": text_param(action) })
        }
        ActionIntent::Clear => json!({ "$type": "ClearCommand" }),
        ActionIntent::DeleteWord => json!({ "$type": "DeleteWordCommand" }),
        ActionIntent::DeleteCharacter => json!({ "$type": "DeleteCharacterCommand" }),
        ActionIntent::PlayAudio => json!({
            "$type": "PlayAudioCommand",
            "Identifier": action
                .parameters
                .get(PARAM_IDENTIFIER)
                .and_then(Value::as_str)
                .unwrap_or_default(),
        }),
        _ => json!({ "$type": "SpeakCommand" }),
    }
}

/// TouchChat action codes.
pub mod touchchat_codes {
    pub const INSERT_TEXT: i64 = 1;
    pub const SPEAK: i64 = 2;
    pub const NAVIGATE: i64 = 9;
    pub const GO_BACK: i64 = 10;
    pub const GO_HOME: i64 = 11;
    pub const CLEAR: i64 = 17;
    pub const DELETE_WORD: i64 = 20;
    pub const DELETE_CHARACTER: i64 = 21;
    pub const PLAY_AUDIO: i64 = 39;
}

// TouchChat: {"code": 9, "data": {"0": "12"}}

fn normalize_touchchat(value: &Value) -> SemanticAction {
    use touchchat_codes::*;

    let code = value.get("code").and_then(Value::as_i64).unwrap_or(-1);
    let data = value
        .get("data")
        .and_then(|data| string_field(data, "0"));
    match code {
        NAVIGATE => with_optional(SemanticAction::new(ActionIntent::NavigateTo), PARAM_TARGET, data),
        GO_BACK => SemanticAction::new(ActionIntent::GoBack),
        GO_HOME => SemanticAction::new(ActionIntent::GoHome),
        SPEAK if data.is_some() => {
            with_optional(SemanticAction::new(ActionIntent::SpeakCustom), PARAM_TEXT, data)
        }
        SPEAK => SemanticAction::new(ActionIntent::Speak),
        INSERT_TEXT => with_optional(SemanticAction::new(ActionIntent::InsertText), PARAM_TEXT, data),
        CLEAR => SemanticAction::new(ActionIntent::Clear),
        DELETE_WORD => SemanticAction::new(ActionIntent::DeleteWord),
        DELETE_CHARACTER => SemanticAction::new(ActionIntent::DeleteCharacter),
        PLAY_AUDIO => {
            with_optional(SemanticAction::new(ActionIntent::PlayAudio), PARAM_IDENTIFIER, data)
        }
        _ => with_optional(SemanticAction::new(ActionIntent::Custom), PARAM_TEXT, data),
    }
}

fn touchchat_action(intent: ActionIntent, action: &SemanticAction) -> Value {
    use touchchat_codes::*;

    let with_data = |code: i64, data: String| json!({ "code": code, "data": { "0": data } });
    match intent {
        ActionIntent::NavigateTo => with_data(NAVIGATE, target_param(action)),
        ActionIntent::GoBack => json!({ "code": GO_BACK }),
        ActionIntent::GoHome => json!({ "code": GO_HOME }),
        ActionIntent::SpeakCustom => with_data(SPEAK, text_param(action)),
        ActionIntent::InsertText => with_data(INSERT_TEXT, text_param(action)),
        ActionIntent::Clear => json!({ "code": CLEAR }),
        ActionIntent::DeleteWord => json!({ "code": DELETE_WORD }),
        ActionIntent::DeleteCharacter => json!({ "code": DELETE_CHARACTER }),
        ActionIntent::PlayAudio => with_data(
            PLAY_AUDIO,
            action
                .parameters
                .get(PARAM_IDENTIFIER)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ),
        _ => json!({ "code": SPEAK }),
    }
}

// Open Board Format: {"load_board": {"id": "..", "path": ".."}} or {"action": ":clear"}

fn normalize_obf(value: &Value) -> SemanticAction {
    if let Some(board) = value.get("load_board") {
        let action = with_optional(
            SemanticAction::new(ActionIntent::NavigateTo),
            PARAM_TARGET,
            string_field(board, "id"),
        );
        return with_optional(action, PARAM_PATH, string_field(board, "path"));
    }

    let name = value.get("action").and_then(Value::as_str).unwrap_or_default();
    if let Some(text) = name.strip_prefix('+') {
        return SemanticAction::new(ActionIntent::InsertText).with_parameter(PARAM_TEXT, text);
    }
    match name {
        ":back" => SemanticAction::new(ActionIntent::GoBack),
        ":home" => SemanticAction::new(ActionIntent::GoHome),
        ":speak" => SemanticAction::new(ActionIntent::Speak),
        ":clear" => SemanticAction::new(ActionIntent::Clear),
        ":deleteword" => SemanticAction::new(ActionIntent::DeleteWord),
        ":backspace" => SemanticAction::new(ActionIntent::DeleteCharacter),
        _ => with_optional(
            SemanticAction::new(ActionIntent::Custom),
            PARAM_TEXT,
            string_field(value, "vocalization"),
        ),
    }
}

fn obf_action(intent: ActionIntent, action: &SemanticAction) -> Value {
    match intent {
        ActionIntent::NavigateTo => {
            let mut board = Map::new();
            board.insert("id".to_string(), Value::String(target_param(action)));
            if let Some(path) = action.parameters.get(PARAM_PATH) {
                board.insert("path".to_string(), path.clone());
            }
            json!({ "load_board": board })
        }
        ActionIntent::GoBack => json!({ "action": ":back" }),
        ActionIntent::GoHome => json!({ "action": ":home" }),
        ActionIntent::SpeakCustom => json!({ "vocalization": text_param(action) }),
        ActionIntent::InsertText => json!({ "action": format!("+{}", text_param(action)) }),
        ActionIntent::Clear => json!({ "action": ":clear" }),
        ActionIntent::DeleteCharacter => json!({ "action": ":backspace" }),
        _ => json!({ "action": ":speak" }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_intent() {
        for intent in ActionIntent::ALL {
            assert_eq!(SemanticAction::new(intent).category, intent.category());
        }
        assert_eq!(ActionIntent::NavigateTo.category(), ActionCategory::Navigation);
        assert_eq!(ActionIntent::Clear.category(), ActionCategory::System);
        assert_eq!(ActionIntent::SpeakCustom.category(), ActionCategory::Communication);
        assert_eq!(ActionIntent::Custom.category(), ActionCategory::Custom);
    }

    #[test]
    fn grid3_jump_normalizes_to_navigation() {
        let vendor = json!({"ID": "Jump.To", "Parameters": {"grid": "Food"}});
        let action = normalize(&vendor, Platform::Grid3);
        assert_eq!(action.intent, ActionIntent::NavigateTo);
        assert_eq!(action.target(), Some("Food"));
        assert_eq!(action.platform_data["grid3"], vendor);
    }

    #[test]
    fn same_platform_round_trip_is_verbatim() {
        let vendor = json!({"ID": "Settings.Volume", "Parameters": {"level": 7}, "Extra": [1, 2]});
        let action = normalize(&vendor, Platform::Grid3);
        assert_eq!(action.intent, ActionIntent::Custom);
        assert_eq!(denormalize(&action, Platform::Grid3), vendor);
    }

    #[test]
    fn cross_platform_conversion_synthesizes_closest_action() {
        let snap = json!({"$type": "ClearCommand"});
        let action = normalize(&snap, Platform::Snap);
        assert_eq!(denormalize(&action, Platform::Grid3), json!({"ID": "Action.Clear"}));
        assert_eq!(denormalize(&action, Platform::Obf), json!({"action": ":clear"}));
        assert_eq!(
            denormalize(&action, Platform::TouchChat),
            json!({"code": touchchat_codes::CLEAR})
        );
    }

    #[test]
    fn unknown_actions_degrade_without_failing() {
        let vendor = json!({"code": 999, "data": {"0": "hello"}});
        let action = normalize(&vendor, Platform::TouchChat);
        assert_eq!(action.intent, ActionIntent::Custom);
        assert_eq!(
            denormalize(&action, Platform::Grid3),
            json!({"ID": "Action.InsertText", "Parameters": {"text": "hello"}})
        );
        let bare = SemanticAction::new(ActionIntent::NavigateTo);
        assert_eq!(denormalize(&bare, Platform::Snap), json!({"$type": "SpeakCommand"}));
    }

    #[test]
    fn obf_insert_text_uses_plus_prefix() {
        let action = normalize(&json!({"action": "+hello"}), Platform::Obf);
        assert_eq!(action.intent, ActionIntent::InsertText);
        assert_eq!(action.text(), Some("hello"));
        assert_eq!(ActionIntent::from_name("insert_text"), Some(ActionIntent::InsertText));
    }
}
