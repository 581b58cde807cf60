//! # Command/Flag Tree Model
//!
//! The immutable-shape-at-resolve-time graph the matching engine walks. A
//! [`Command`] owns its children and flags exclusively; the upward reference
//! needed for path reconstruction is a sealed dotted-path string assigned by
//! [`Command::seal`] before resolution, never a strong parent pointer.

use crate::context::Context;
use crate::core::matcher::{MatchError, MatchState};
use crate::core::value::{Value, ValueKind};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::constants::UNSORTED_GROUP;

#[derive(Error, Debug)]
pub enum TreeError {
    #[error("command name '{name}' is ambiguous, candidates: {candidates:?}")]
    AmbiguousCommand {
        name: String,
        candidates: Vec<String>,
    },
    #[error("flag name '{name}' is ambiguous, candidates: {candidates:?}")]
    AmbiguousFlag {
        name: String,
        candidates: Vec<String>,
    },
}

/// How a flag acquires its value from an external collaborator at match time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTool {
    PasswordPrompt,
    Editor,
}

/// Invoked synchronously when a flag is set, in argv encounter order.
/// Receives the token's 1-based position in argv and the mutable match
/// state. Preset-injected tokens are not part of argv and report position 0.
pub type OnMatched = Box<dyn FnMut(usize, &mut MatchState)>;

/// The residual context handed to a matched command's action.
#[derive(Debug)]
pub struct ActionArgs<'a> {
    /// Dotted path of the matched command (empty for the root).
    pub command_path: &'a str,
    /// Non-flag tokens left after the terminal command.
    pub positionals: &'a [String],
}

/// A terminal action callback. Reads flag values through the store and may
/// suggest the process exit code via the context.
pub type Action = Box<dyn Fn(&mut Context, &ActionArgs<'_>) -> anyhow::Result<()>>;

/// Lazily produces additional child commands at resolution time.
pub type DynamicEval = Box<dyn Fn(&Context, &Command) -> Result<Vec<Command>, MatchError>>;

/// A command's dynamic-subcommand evaluator plus its materialization state.
pub struct DynamicChildren {
    pub(crate) producer: DynamicEval,
    /// When true the produced list is kept and reused across resolutions.
    pub(crate) cache: bool,
    pub(crate) materialized: bool,
    /// How many children at the tail of `children` were produced dynamically.
    pub(crate) produced: usize,
}

impl DynamicChildren {
    pub fn new(producer: DynamicEval) -> Self {
        Self {
            producer,
            cache: false,
            materialized: false,
            produced: 0,
        }
    }

    /// A caching variant: the evaluator runs once and its output is reused.
    pub fn cached(producer: DynamicEval) -> Self {
        Self {
            cache: true,
            ..Self::new(producer)
        }
    }
}

impl fmt::Debug for DynamicChildren {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicChildren")
            .field("cache", &self.cache)
            .field("materialized", &self.materialized)
            .field("produced", &self.produced)
            .finish()
    }
}

// --- FLAG ---

/// A flag attached to exactly one command (or to the root, acting globally).
pub struct Flag {
    pub long: String,
    pub short: String,
    pub aliases: Vec<String>,
    pub kind: ValueKind,
    pub default: Option<Value>,
    pub desc: String,
    pub group: String,
    pub placeholder: String,
    /// Accepts the generic `--no-<long>` inverse spelling.
    pub negatable: bool,
    /// Non-empty makes this a GCC-style family head: `-<short><item>` /
    /// `-<short>no-<item>` set and clear per-item keys under the flag's key.
    pub negatable_items: Vec<String>,
    /// Accepts `+<name>` as an alternate true-setting spelling.
    pub leading_plus: bool,
    /// Flags sharing a toggle-group name on one command are mutually exclusive.
    pub toggle_group: String,
    /// Allows `-NNN` as shorthand for `--<long> NNN` on the owning command.
    pub head_like: bool,
    pub head_bounds: Option<(i64, i64)>,
    /// Non-empty restricts accepted string values to this set.
    pub valid_args: Vec<String>,
    /// Must be supplied by argv, env or a config file; a default never counts.
    pub required: bool,
    pub external_tool: Option<ExternalTool>,
    /// Environment variable names consulted for this flag, highest first.
    pub env_vars: Vec<String>,
    pub hidden: bool,
    pub vendor_hidden: bool,
    /// Non-empty marks the flag deprecated; matched uses log a warning.
    pub deprecated: String,
    pub on_matched: Option<OnMatched>,
}

impl Flag {
    pub fn new(long: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            long: long.into(),
            short: String::new(),
            aliases: Vec::new(),
            kind,
            default: None,
            desc: String::new(),
            group: String::new(),
            placeholder: String::new(),
            negatable: false,
            negatable_items: Vec::new(),
            leading_plus: false,
            toggle_group: String::new(),
            head_like: false,
            head_bounds: None,
            valid_args: Vec::new(),
            required: false,
            external_tool: None,
            env_vars: Vec::new(),
            hidden: false,
            vendor_hidden: false,
            deprecated: String::new(),
            on_matched: None,
        }
    }

    pub fn bool(long: impl Into<String>) -> Self {
        Self::new(long, ValueKind::Bool)
    }

    pub fn with_short(mut self, short: impl Into<String>) -> Self {
        self.short = short.into();
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    pub fn negatable(mut self) -> Self {
        self.negatable = true;
        self
    }

    /// Restricts negation to a named family, GCC style.
    pub fn negatable_family<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.negatable = true;
        self.negatable_items = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn leading_plus(mut self) -> Self {
        self.leading_plus = true;
        self
    }

    pub fn with_toggle_group(mut self, group: impl Into<String>) -> Self {
        self.toggle_group = group.into();
        self
    }

    pub fn head_like(mut self, bounds: Option<(i64, i64)>) -> Self {
        self.head_like = true;
        self.head_bounds = bounds;
        self
    }

    pub fn with_valid_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_external_tool(mut self, tool: ExternalTool) -> Self {
        self.external_tool = Some(tool);
        self
    }

    pub fn with_env_vars<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.env_vars = vars.into_iter().map(Into::into).collect();
        self
    }

    pub fn deprecated(mut self, note: impl Into<String>) -> Self {
        self.deprecated = note.into();
        self
    }

    pub fn on_matched(mut self, callback: OnMatched) -> Self {
        self.on_matched = Some(callback);
        self
    }

    /// True when `name` is this flag's long, short or one of its aliases.
    pub fn matches_name(&self, name: &str) -> bool {
        self.long == name
            || (!self.short.is_empty() && self.short == name)
            || self.aliases.iter().any(|a| a == name)
    }

    pub fn group_or_unsorted(&self) -> &str {
        if self.group.is_empty() {
            UNSORTED_GROUP
        } else {
            &self.group
        }
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("long", &self.long)
            .field("short", &self.short)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("toggle_group", &self.toggle_group)
            .field("head_like", &self.head_like)
            .finish_non_exhaustive()
    }
}

// --- COMMAND ---

/// A node in the command tree.
pub struct Command {
    pub long: String,
    pub short: String,
    pub aliases: Vec<String>,
    pub desc: String,
    pub long_desc: String,
    pub group: String,
    pub hidden: bool,
    pub vendor_hidden: bool,
    pub deprecated: String,
    /// Dotted path substituted when this node is the terminal match with no
    /// subcommand token following.
    pub redirect_to: Option<String>,
    /// Arguments silently prepended to the remaining token stream on match.
    pub presets: Vec<String>,
    /// Terminal command line run through the user's shell, bypassing actions.
    pub invoke_shell: Option<String>,
    /// Terminal command line spawned directly, bypassing actions.
    pub invoke_proc: Option<String>,
    pub children: Vec<Command>,
    pub flags: Vec<Flag>,
    pub dynamic: Option<DynamicChildren>,
    pub action: Option<Action>,
    /// Sealed dotted path from the root (exclusive); empty for the root.
    path: String,
    pub hit_count: u32,
    pub last_hit_title: String,
}

impl Command {
    pub fn new(long: impl Into<String>) -> Self {
        Self {
            long: long.into(),
            short: String::new(),
            aliases: Vec::new(),
            desc: String::new(),
            long_desc: String::new(),
            group: String::new(),
            hidden: false,
            vendor_hidden: false,
            deprecated: String::new(),
            redirect_to: None,
            presets: Vec::new(),
            invoke_shell: None,
            invoke_proc: None,
            children: Vec::new(),
            flags: Vec::new(),
            dynamic: None,
            action: None,
            path: String::new(),
            hit_count: 0,
            last_hit_title: String::new(),
        }
    }

    /// A root node. Its title is the application name; the dotted path of the
    /// root itself stays empty.
    pub fn root(app: impl Into<String>) -> Self {
        Self::new(app)
    }

    pub fn with_short(mut self, short: impl Into<String>) -> Self {
        self.short = short.into();
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn deprecated(mut self, note: impl Into<String>) -> Self {
        self.deprecated = note.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect_to = Some(target.into());
        self
    }

    pub fn with_presets<I, S>(mut self, presets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.presets = presets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_invoke_shell(mut self, command_line: impl Into<String>) -> Self {
        self.invoke_shell = Some(command_line.into());
        self
    }

    pub fn with_invoke_proc(mut self, command_line: impl Into<String>) -> Self {
        self.invoke_proc = Some(command_line.into());
        self
    }

    pub fn with_dynamic(mut self, dynamic: DynamicChildren) -> Self {
        self.dynamic = Some(dynamic);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn add_child(mut self, child: Command) -> Self {
        self.children.push(child);
        self
    }

    pub fn add_flag(mut self, flag: Flag) -> Self {
        self.flags.push(flag);
        self
    }

    /// Assigns dotted paths throughout the subtree. Must run (from the root)
    /// after the structure is final and before resolution starts; the engine
    /// seals automatically.
    pub fn seal(&mut self) {
        self.path.clear();
        for child in &mut self.children {
            child.seal_with_prefix("");
        }
    }

    pub(crate) fn seal_with_prefix(&mut self, prefix: &str) {
        self.path = if prefix.is_empty() {
            self.long.clone()
        } else {
            format!("{}.{}", prefix, self.long)
        };
        let own_path = self.path.clone();
        for child in &mut self.children {
            child.seal_with_prefix(&own_path);
        }
    }

    /// The '.'-joined chain of ancestor titles from root (exclusive) to this
    /// node. Empty for the root.
    pub fn dotted_path(&self) -> &str {
        &self.path
    }

    pub fn group_or_unsorted(&self) -> &str {
        if self.group.is_empty() {
            UNSORTED_GROUP
        } else {
            &self.group
        }
    }

    pub(crate) fn record_hit(&mut self, token: &str) {
        self.hit_count += 1;
        self.last_hit_title = token.to_string();
    }

    fn matches_name_exact(&self, name: &str) -> bool {
        self.long == name || (!self.short.is_empty() && self.short == name)
    }

    /// Finds a direct child by name: exact title, then alias, then
    /// unambiguous prefix of a long title. Returns the child index.
    pub fn find_child(&self, name: &str) -> Result<Option<usize>, TreeError> {
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(idx) = self
            .children
            .iter()
            .position(|c| c.matches_name_exact(name))
        {
            return Ok(Some(idx));
        }
        if let Some(idx) = self
            .children
            .iter()
            .position(|c| c.aliases.iter().any(|a| a == name))
        {
            return Ok(Some(idx));
        }
        let prefixed: Vec<usize> = self
            .children
            .iter()
            .enumerate()
            .filter(|(_, c)| c.long.starts_with(name))
            .map(|(i, _)| i)
            .collect();
        match prefixed.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            many => Err(TreeError::AmbiguousCommand {
                name: name.to_string(),
                candidates: many
                    .iter()
                    .filter_map(|&i| self.children.get(i).map(|c| c.long.clone()))
                    .collect(),
            }),
        }
    }

    /// Wide search: exact/alias lookup across the whole subtree,
    /// breadth-first, nearest level wins.
    pub fn find_descendant(&self, name: &str) -> Option<&Command> {
        let mut queue: std::collections::VecDeque<&Command> = self.children.iter().collect();
        // First pass per level happens naturally with BFS ordering.
        while let Some(node) = queue.pop_front() {
            if node.matches_name_exact(name) || node.aliases.iter().any(|a| a == name) {
                return Some(node);
            }
            queue.extend(node.children.iter());
        }
        None
    }

    /// Finds a flag declared on this command: exact long/short/alias, then
    /// unambiguous prefix of a long title. Returns the flag index.
    pub fn find_flag(&self, name: &str) -> Result<Option<usize>, TreeError> {
        if name.is_empty() {
            return Ok(None);
        }
        if let Some(idx) = self.flags.iter().position(|f| f.matches_name(name)) {
            return Ok(Some(idx));
        }
        let prefixed: Vec<usize> = self
            .flags
            .iter()
            .enumerate()
            .filter(|(_, f)| f.long.starts_with(name))
            .map(|(i, _)| i)
            .collect();
        match prefixed.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(*only)),
            many => Err(TreeError::AmbiguousFlag {
                name: name.to_string(),
                candidates: many
                    .iter()
                    .filter_map(|&i| self.flags.get(i).map(|f| f.long.clone()))
                    .collect(),
            }),
        }
    }

    /// The designated head-like flag of this command, if any.
    pub fn head_like_flag(&self) -> Option<usize> {
        self.flags.iter().position(|f| f.head_like)
    }

    /// Indices of flags sharing `toggle_group`, excluding `except`.
    pub(crate) fn toggle_siblings(&self, toggle_group: &str, except: usize) -> Vec<usize> {
        self.flags
            .iter()
            .enumerate()
            .filter(|(i, f)| *i != except && f.toggle_group == toggle_group)
            .map(|(i, _)| i)
            .collect()
    }

    /// Child commands grouped by their group label; the empty group maps to
    /// the unsorted sentinel. Vendor-hidden nodes are omitted.
    pub fn commands_by_group(&self) -> BTreeMap<&str, Vec<&Command>> {
        let mut groups: BTreeMap<&str, Vec<&Command>> = BTreeMap::new();
        for child in self.children.iter().filter(|c| !c.vendor_hidden) {
            groups.entry(child.group_or_unsorted()).or_default().push(child);
        }
        groups
    }

    /// Flags grouped by their group label, unsorted sentinel for the empty
    /// group. Vendor-hidden flags are omitted.
    pub fn flags_by_group(&self) -> BTreeMap<&str, Vec<&Flag>> {
        let mut groups: BTreeMap<&str, Vec<&Flag>> = BTreeMap::new();
        for flag in self.flags.iter().filter(|f| !f.vendor_hidden) {
            groups.entry(flag.group_or_unsorted()).or_default().push(flag);
        }
        groups
    }

    /// Resolves a dotted path (root-exclusive) to a node, by exact titles
    /// and aliases.
    pub fn find_by_dotted_path(&self, path: &str) -> Option<&Command> {
        self.index_path_for(path).map(|indices| {
            let mut node = self;
            for idx in indices {
                node = &node.children[idx];
            }
            node
        })
    }

    /// Resolves a dotted path to the chain of child indices from this node.
    pub(crate) fn index_path_for(&self, path: &str) -> Option<Vec<usize>> {
        let mut node = self;
        let mut indices = Vec::new();
        for part in path.split('.').filter(|p| !p.is_empty()) {
            let idx = node
                .children
                .iter()
                .position(|c| c.matches_name_exact(part) || c.aliases.iter().any(|a| a == part))?;
            indices.push(idx);
            node = &node.children[idx];
        }
        Some(indices)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("long", &self.long)
            .field("path", &self.path)
            .field("children", &self.children.len())
            .field("flags", &self.flags)
            .field("redirect_to", &self.redirect_to)
            .field("hit_count", &self.hit_count)
            .finish_non_exhaustive()
    }
}

// MARK: --- UNIT TESTS ---
