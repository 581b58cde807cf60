//! # Matching Engine
//!
//! Transforms argv (post program-name) into a terminal command plus a fully
//! populated store region, or a typed error. The engine walks the command
//! tree token by token, resolving flag dialects (long/short/alias, inline
//! `=value`, `+flag`, `-NNN` head-like shorthand, GCC-style `-Wx`/`-Wno-x`
//! families, generic `--no-x` negation), enforcing toggle-group exclusivity,
//! valid-args enumerations and required flags, and finally dispatches the
//! matched command's action or external invocation.

use crate::constants::FLAG_TERMINATOR;
use crate::context::Context;
use crate::core::store::{Source, Store};
use crate::core::tree::{ActionArgs, Command, ExternalTool, TreeError};
use crate::core::value::{Value, ValueError, ValueKind};
use crate::system::executor::{self, ExecutionError};
use crate::system::external::{self, ExternalToolError};
use colored::Colorize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("unknown command '{name}'")]
    UnknownCommand { name: String },
    #[error("unknown flag '{name}'")]
    UnknownFlag { name: String },
    #[error("flag '--{flag}' expects a value but none was supplied")]
    MissingValue { flag: String },
    #[error("invalid value for flag '--{flag}': {source}")]
    ValueParse {
        flag: String,
        #[source]
        source: ValueError,
    },
    #[error("value {value} for flag '--{flag}' is out of bounds [{min}, {max}]")]
    OutOfBounds {
        flag: String,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("value '{value}' for flag '--{flag}' is not one of {allowed:?}")]
    InvalidChoice {
        flag: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("required flag '{key}' was not supplied by argv, environment or config")]
    RequiredFlagMissing { key: String },
    #[error("redirect chain revisits '{path}'")]
    RedirectCycle { path: String },
    #[error(transparent)]
    External(#[from] ExternalToolError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("dynamic child scan of '{path}' failed")]
    DynamicScan {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("action for '{command}' failed: {source}")]
    Action {
        command: String,
        #[source]
        source: anyhow::Error,
    },
}

/// What to do with a flag-shaped token nothing resolves.
pub enum UnknownHandling {
    /// Fail resolution with [`MatchError::UnknownFlag`].
    Error,
    /// Keep the raw token as a positional argument.
    Positional,
    /// Ask a fallback handler; a `false` return fails resolution.
    Handler(Box<dyn Fn(&str, &mut MatchState) -> bool>),
}

impl fmt::Debug for UnknownHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("Error"),
            Self::Positional => f.write_str("Positional"),
            Self::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

/// Mutable state visible to on-matched callbacks and the unknown handler.
/// Callbacks must stay side-effect-local to this state and the store; they
/// must never re-enter the engine.
#[derive(Debug)]
pub struct MatchState {
    /// A handle to the resolution store.
    pub store: Store,
    /// Dotted path of the command matched so far.
    pub command_path: String,
    /// Store keys written from argv, in encounter order.
    pub matched_keys: Vec<String>,
    /// Residual non-flag tokens collected so far.
    pub positionals: Vec<String>,
}

/// The outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Dotted path of the terminal command (empty for the root).
    pub command_path: String,
    pub positionals: Vec<String>,
    /// The exit code suggested by the action or external invocation.
    pub exit_code: i32,
}

/// The engine itself. Construction is cheap; one instance can resolve many
/// argv streams against many trees.
#[derive(Debug)]
pub struct Matcher {
    /// Search ancestor commands for a flag name the current command lacks.
    pub backward_flag_search: bool,
    pub unknown: UnknownHandling,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            backward_flag_search: true,
            unknown: UnknownHandling::Error,
        }
    }
}

/// Resolution of a flag-shaped token at one command level.
enum FlagHit {
    Direct(usize),
    Negated(usize),
    Family { idx: usize, item: String, on: bool },
}

/// A detached copy of the flag fields the engine needs while `root` is
/// mutably borrowed elsewhere.
struct FlagInfo {
    long: String,
    kind: ValueKind,
    toggle_group: String,
    valid_args: Vec<String>,
    negatable_simple: bool,
    external_tool: Option<ExternalTool>,
    deprecated: String,
    command_path: String,
    sibling_longs: Vec<String>,
}

impl Matcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_backward_search(mut self) -> Self {
        self.backward_flag_search = false;
        self
    }

    pub fn with_unknown_handling(mut self, unknown: UnknownHandling) -> Self {
        self.unknown = unknown;
        self
    }

    /// Resolves `argv` against `root`, populating the store, dispatching the
    /// terminal command and returning the resolution outcome.
    pub fn resolve(
        &self,
        root: &mut Command,
        ctx: &mut Context,
        argv: &[String],
    ) -> Result<Resolution, MatchError> {
        root.seal();
        seed_defaults(root, ctx);
        apply_env_aliases(root, ctx);

        let mut path: Vec<usize> = Vec::new();
        materialize_dynamic(root, &path, ctx)?;

        // Each token carries its 1-based argv index; preset-injected tokens
        // are not part of argv and carry index 0.
        let mut tokens: VecDeque<(String, usize)> = argv
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i + 1))
            .collect();
        let mut state = MatchState {
            store: ctx.store().clone(),
            command_path: String::new(),
            matched_keys: Vec::new(),
            positionals: Vec::new(),
        };
        let mut flags_done = false;
        let mut descending = true;

        while let Some((token, argv_position)) = tokens.pop_front() {
            if !flags_done && token == FLAG_TERMINATOR {
                flags_done = true;
                continue;
            }
            if !flags_done && is_flag_shaped(&token) {
                self.handle_flag(root, &path, ctx, &token, argv_position, &mut tokens, &mut state)?;
                continue;
            }
            if descending && !flags_done {
                match node(root, &path).find_child(&token)? {
                    Some(idx) => {
                        path.push(idx);
                        {
                            let cmd = node_mut(root, &path);
                            cmd.record_hit(&token);
                            if !cmd.deprecated.is_empty() {
                                log::warn!(
                                    "command '{}' is deprecated: {}",
                                    cmd.long,
                                    cmd.deprecated
                                );
                            }
                            for preset in cmd.presets.iter().rev() {
                                tokens.push_front((preset.clone(), 0));
                            }
                        }
                        state.command_path = node(root, &path).dotted_path().to_string();
                        materialize_dynamic(root, &path, ctx)?;
                        continue;
                    }
                    None => descending = false,
                }
            }
            state.positionals.push(token);
        }

        // A terminal node with a redirect target substitutes that path; a
        // chain revisiting a node is a configuration error.
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(node(root, &path).dotted_path().to_string());
        while let Some(target) = node(root, &path).redirect_to.clone() {
            if !visited.insert(target.clone()) {
                return Err(MatchError::RedirectCycle { path: target });
            }
            log::debug!(
                "redirecting '{}' to '{}'",
                node(root, &path).dotted_path(),
                target
            );
            path = root
                .index_path_for(&target)
                .ok_or(MatchError::UnknownCommand {
                    name: target.clone(),
                })?;
            node_mut(root, &path).record_hit(&target);
        }

        self.check_required(root, &path, ctx)?;

        let command_path = node(root, &path).dotted_path().to_string();
        if let Some(line) = node(root, &path).invoke_proc.clone() {
            let code = executor::run_process(&line, None)?;
            ctx.suggest_exit_code(code);
        } else if let Some(line) = node(root, &path).invoke_shell.clone() {
            let code = executor::run_shell(&line, None)?;
            ctx.suggest_exit_code(code);
        } else if node(root, &path).action.is_some() {
            let args = ActionArgs {
                command_path: &command_path,
                positionals: &state.positionals,
            };
            let terminal = node(root, &path);
            if let Some(action) = &terminal.action {
                (action)(ctx, &args).map_err(|source| MatchError::Action {
                    command: command_path.clone(),
                    source,
                })?;
            }
        }

        Ok(Resolution {
            command_path,
            positionals: state.positionals,
            exit_code: ctx.suggested_exit_code(),
        })
    }

    /// The command levels a flag name is resolved against: current command
    /// first, then each ancestor up to the root when backward search is on.
    fn search_levels(&self, path: &[usize]) -> Vec<Vec<usize>> {
        if self.backward_flag_search {
            (0..=path.len()).rev().map(|k| path[..k].to_vec()).collect()
        } else {
            vec![path.to_vec()]
        }
    }

    fn handle_flag(
        &self,
        root: &mut Command,
        path: &[usize],
        ctx: &mut Context,
        token: &str,
        argv_position: usize,
        tokens: &mut VecDeque<(String, usize)>,
        state: &mut MatchState,
    ) -> Result<(), MatchError> {
        let (body, plus, long_form) = if let Some(b) = token.strip_prefix("--") {
            (b, false, true)
        } else if let Some(b) = token.strip_prefix('+') {
            (b, true, false)
        } else if let Some(b) = token.strip_prefix('-') {
            (b, false, false)
        } else {
            (token, false, false)
        };
        if body.is_empty() {
            // A bare "-" or "+" carries no name; treat it as data.
            state.positionals.push(token.to_string());
            return Ok(());
        }
        let (name, inline) = match body.split_once('=') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (body, None),
        };

        // Head-like shorthand: `-NNN` on a command that designates one.
        if !plus && !long_form && inline.is_none() && name.chars().all(|c| c.is_ascii_digit())
        {
            for level in self.search_levels(path) {
                if let Some(fidx) = node(root, &level).head_like_flag() {
                    return self.set_head_like(root, &level, fidx, ctx, name, argv_position, state);
                }
            }
            // No head-like designation anywhere in scope; fall through to
            // ordinary resolution (which will not find a flag named NNN).
        }

        for level in self.search_levels(path) {
            let hit = find_flag_dialects(node(root, &level), name, plus)?;
            if let Some(hit) = hit {
                return self.apply_hit(
                    root,
                    &level,
                    hit,
                    ctx,
                    inline,
                    argv_position,
                    tokens,
                    state,
                );
            }
        }

        match &self.unknown {
            UnknownHandling::Error => Err(MatchError::UnknownFlag {
                name: token.to_string(),
            }),
            UnknownHandling::Positional => {
                log::debug!("keeping unknown flag '{}' as a positional", token);
                state.positionals.push(token.to_string());
                Ok(())
            }
            UnknownHandling::Handler(handler) => {
                if handler(token, state) {
                    Ok(())
                } else {
                    Err(MatchError::UnknownFlag {
                        name: token.to_string(),
                    })
                }
            }
        }
    }

    fn apply_hit(
        &self,
        root: &mut Command,
        level: &[usize],
        hit: FlagHit,
        ctx: &mut Context,
        inline: Option<String>,
        argv_position: usize,
        tokens: &mut VecDeque<(String, usize)>,
        state: &mut MatchState,
    ) -> Result<(), MatchError> {
        let (fidx, info) = {
            let cmd = node(root, level);
            let fidx = match hit {
                FlagHit::Direct(i) | FlagHit::Negated(i) | FlagHit::Family { idx: i, .. } => i,
            };
            let flag = &cmd.flags[fidx];
            let info = FlagInfo {
                long: flag.long.clone(),
                kind: flag.kind,
                toggle_group: flag.toggle_group.clone(),
                valid_args: flag.valid_args.clone(),
                negatable_simple: flag.negatable && flag.negatable_items.is_empty(),
                external_tool: flag.external_tool,
                deprecated: flag.deprecated.clone(),
                command_path: cmd.dotted_path().to_string(),
                sibling_longs: if flag.toggle_group.is_empty() {
                    Vec::new()
                } else {
                    cmd.toggle_siblings(&flag.toggle_group, fidx)
                        .into_iter()
                        .filter_map(|i| cmd.flags.get(i).map(|f| f.long.clone()))
                        .collect()
                },
            };
            (fidx, info)
        };

        if !info.deprecated.is_empty() {
            log::warn!(
                "flag '--{}' is deprecated: {}",
                info.long.yellow(),
                info.deprecated
            );
        }

        let key = ctx.store_key(&info.command_path, &info.long);
        let store = ctx.store().clone();

        match hit {
            FlagHit::Negated(_) => {
                store.set(&key, Value::Bool(false), Source::Argv);
                let no_key = ctx.store_key(&info.command_path, &format!("no-{}", info.long));
                store.set(&no_key, Value::Bool(true), Source::Argv);
            }
            FlagHit::Family { item, on, .. } => {
                let item_key = format!("{}.{}", key, item);
                let no_item_key = format!("{}.no-{}", key, item);
                store.set(&item_key, Value::Bool(on), Source::Argv);
                store.set(&no_item_key, Value::Bool(!on), Source::Argv);
            }
            FlagHit::Direct(_) => {
                let value = if info.kind == ValueKind::Bool {
                    match &inline {
                        Some(raw) => {
                            Value::parse(ValueKind::Bool, raw).map_err(|source| {
                                MatchError::ValueParse {
                                    flag: info.long.clone(),
                                    source,
                                }
                            })?
                        }
                        None => Value::Bool(true),
                    }
                } else {
                    let raw = match inline {
                        Some(raw) => raw,
                        None => match info.external_tool {
                            Some(ExternalTool::PasswordPrompt) => {
                                external::prompt_password(&format!("{}: ", info.long))?
                            }
                            Some(ExternalTool::Editor) => external::edit_in_editor("")?,
                            None => tokens.pop_front().map(|(t, _)| t).ok_or_else(|| {
                                MatchError::MissingValue {
                                    flag: info.long.clone(),
                                }
                            })?,
                        },
                    };
                    if !info.valid_args.is_empty() && !info.valid_args.iter().any(|a| *a == raw)
                    {
                        return Err(MatchError::InvalidChoice {
                            flag: info.long.clone(),
                            value: raw,
                            allowed: info.valid_args.clone(),
                        });
                    }
                    Value::parse(info.kind, &raw).map_err(|source| MatchError::ValueParse {
                        flag: info.long.clone(),
                        source,
                    })?
                };

                // Toggle-group exclusivity: the freshest member wins, prior
                // members drop to false.
                for sibling in &info.sibling_longs {
                    let sib_key = ctx.store_key(&info.command_path, sibling);
                    if store.get_bool(&sib_key) == Some(true) {
                        store.set(&sib_key, Value::Bool(false), Source::Argv);
                    }
                }

                store.set(&key, value, Source::Argv);
                if info.negatable_simple {
                    let no_key =
                        ctx.store_key(&info.command_path, &format!("no-{}", info.long));
                    store.set(&no_key, Value::Bool(false), Source::Argv);
                }
            }
        }

        state.matched_keys.push(key);
        let flag = &mut node_mut(root, level).flags[fidx];
        if let Some(callback) = flag.on_matched.as_mut() {
            callback(argv_position, state);
        }
        Ok(())
    }

    fn set_head_like(
        &self,
        root: &mut Command,
        level: &[usize],
        fidx: usize,
        ctx: &mut Context,
        digits: &str,
        argv_position: usize,
        state: &mut MatchState,
    ) -> Result<(), MatchError> {
        let (long, bounds, command_path) = {
            let cmd = node(root, level);
            let flag = &cmd.flags[fidx];
            (
                flag.long.clone(),
                flag.head_bounds,
                cmd.dotted_path().to_string(),
            )
        };
        let value: i64 = digits.parse().map_err(|_| MatchError::ValueParse {
            flag: long.clone(),
            source: ValueError::Parse {
                kind: ValueKind::Int,
                raw: digits.to_string(),
            },
        })?;
        if let Some((min, max)) = bounds
            && !(min..=max).contains(&value)
        {
            return Err(MatchError::OutOfBounds {
                flag: long,
                value,
                min,
                max,
            });
        }
        let key = ctx.store_key(&command_path, &long);
        ctx.store().set(&key, Value::Int(value), Source::Argv);
        state.matched_keys.push(key);
        let flag = &mut node_mut(root, level).flags[fidx];
        if let Some(callback) = flag.on_matched.as_mut() {
            callback(argv_position, state);
        }
        Ok(())
    }

    /// Required means "explicitly supplied by some source": argv, env or a
    /// config file. A builder default never satisfies it.
    fn check_required(
        &self,
        root: &Command,
        path: &[usize],
        ctx: &Context,
    ) -> Result<(), MatchError> {
        for depth in 0..=path.len() {
            let cmd = node(root, &path[..depth]);
            for flag in cmd.flags.iter().filter(|f| f.required) {
                let key = ctx.store_key(cmd.dotted_path(), &flag.long);
                let satisfied = ctx
                    .store()
                    .source_of(&key)
                    .is_some_and(|s| s >= Source::ConfigFile);
                if !satisfied {
                    return Err(MatchError::RequiredFlagMissing { key });
                }
            }
        }
        Ok(())
    }
}

// --- free helpers ---

fn is_flag_shaped(token: &str) -> bool {
    token.len() > 1 && (token.starts_with('-') || token.starts_with('+'))
}

fn node<'r>(root: &'r Command, path: &[usize]) -> &'r Command {
    let mut n = root;
    for &i in path {
        n = &n.children[i];
    }
    n
}

fn node_mut<'r>(root: &'r mut Command, path: &[usize]) -> &'r mut Command {
    let mut n = root;
    for &i in path {
        n = &mut n.children[i];
    }
    n
}

/// Writes flag defaults into the store at Default rank, without clobbering
/// anything a config file, env var or earlier run already set.
fn seed_defaults(root: &Command, ctx: &Context) {
    let mut queue: VecDeque<&Command> = VecDeque::new();
    queue.push_back(root);
    while let Some(cmd) = queue.pop_front() {
        for flag in &cmd.flags {
            if let Some(default) = &flag.default {
                let key = ctx.store_key(cmd.dotted_path(), &flag.long);
                if !ctx.store().has(&key) {
                    ctx.store().set(&key, default.clone(), Source::Default);
                }
            }
        }
        queue.extend(cmd.children.iter());
    }
}

/// Applies per-flag environment-variable aliases at Env rank.
fn apply_env_aliases(root: &Command, ctx: &Context) {
    apply_env_aliases_from(root, ctx, |var| std::env::var(var).ok());
}

/// The alias walk with an injected variable source. The first listed alias
/// that resolves wins.
fn apply_env_aliases_from<F>(root: &Command, ctx: &Context, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut queue: VecDeque<&Command> = VecDeque::new();
    queue.push_back(root);
    while let Some(cmd) = queue.pop_front() {
        for flag in &cmd.flags {
            for var in &flag.env_vars {
                let Some(raw) = lookup(var) else { continue };
                match Value::parse(flag.kind, &raw) {
                    Ok(value) => {
                        let key = ctx.store_key(cmd.dotted_path(), &flag.long);
                        ctx.store().set(&key, value, Source::Env);
                    }
                    Err(e) => log::warn!("ignoring env var {}: {}", var, e),
                }
                break;
            }
        }
        queue.extend(cmd.children.iter());
    }
}

/// Runs a command's dynamic evaluator (unless a cached run is still valid)
/// and splices the produced nodes in as ordinary children.
fn materialize_dynamic(
    root: &mut Command,
    path: &[usize],
    ctx: &Context,
) -> Result<(), MatchError> {
    let needs_run = {
        let cmd = node(root, path);
        match &cmd.dynamic {
            Some(d) => !(d.cache && d.materialized),
            None => false,
        }
    };
    if !needs_run {
        return Ok(());
    }

    // Drop whatever the previous resolution produced and zero the tally
    // right away: a failing producer must leave the node with exactly its
    // statically declared children.
    {
        let cmd = node_mut(root, path);
        let produced = cmd.dynamic.as_ref().map_or(0, |d| d.produced);
        let keep = cmd.children.len().saturating_sub(produced);
        cmd.children.truncate(keep);
        if let Some(dynamic) = cmd.dynamic.as_mut() {
            dynamic.produced = 0;
        }
    }

    let new_children = {
        let cmd = node(root, path);
        let dynamic = cmd.dynamic.as_ref().expect("checked above");
        (dynamic.producer)(ctx, cmd)?
    };

    let cmd = node_mut(root, path);
    let prefix = cmd.dotted_path().to_string();
    let count = new_children.len();
    log::debug!(
        "command '{}' produced {} dynamic children",
        if prefix.is_empty() { "<root>" } else { &prefix },
        count
    );
    for mut child in new_children {
        child.seal_with_prefix(&prefix);
        cmd.children.push(child);
    }
    if let Some(dynamic) = cmd.dynamic.as_mut() {
        dynamic.materialized = true;
        dynamic.produced = count;
    }
    Ok(())
}

fn find_flag_dialects(
    cmd: &Command,
    name: &str,
    plus: bool,
) -> Result<Option<FlagHit>, TreeError> {
    if let Some(idx) = cmd.find_flag(name)? {
        let flag = &cmd.flags[idx];
        if !plus || flag.leading_plus {
            return Ok(Some(FlagHit::Direct(idx)));
        }
    }
    if plus {
        // `+name` is only an alternate spelling for leading-plus flags.
        return Ok(None);
    }
    if let Some(rest) = name.strip_prefix("no-")
        && let Some(idx) = cmd.find_flag(rest)?
    {
        let flag = &cmd.flags[idx];
        if flag.negatable && flag.negatable_items.is_empty() && flag.kind == ValueKind::Bool {
            return Ok(Some(FlagHit::Negated(idx)));
        }
    }
    for (idx, flag) in cmd
        .flags
        .iter()
        .enumerate()
        .filter(|(_, f)| !f.negatable_items.is_empty())
    {
        for prefix in [flag.short.as_str(), flag.long.as_str()] {
            if prefix.is_empty() {
                continue;
            }
            if let Some(rest) = name.strip_prefix(prefix) {
                if let Some(item) = rest.strip_prefix("no-") {
                    if flag.negatable_items.iter().any(|i| i == item) {
                        return Ok(Some(FlagHit::Family {
                            idx,
                            item: item.to_string(),
                            on: false,
                        }));
                    }
                } else if flag.negatable_items.iter().any(|i| i == rest) {
                    return Ok(Some(FlagHit::Family {
                        idx,
                        item: rest.to_string(),
                        on: true,
                    }));
                }
            }
        }
    }
    Ok(None)
}

// MARK: --- UNIT TESTS ---
