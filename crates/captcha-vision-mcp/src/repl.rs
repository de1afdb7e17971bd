//! Interactive REPL for the Captcha Vision MCP server.
//!
//! Launch with `captcha-vision-mcp repl` to enter interactive mode.
//! Type `/help` for available commands, Tab for completion.

use std::path::{Path, PathBuf};

use rustyline::completion::{Completer, Pair};
use rustyline::config::CompletionType;
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{
    Cmd, ConditionalEventHandler, Config, Editor, Event, EventContext, EventHandler, Helper,
    KeyEvent, RepeatCount,
};
use tokio::runtime::Handle;

use captcha_vision::{decode_bytes, preprocess, ImageBuffer, Operation};

use crate::context::ToolContext;
use crate::tools::ToolRegistry;
use crate::types::{InitializeResult, ToolContent};

/// Available REPL commands.
const COMMANDS: &[(&str, &str)] = &[
    ("/info", "Show server capabilities and tools"),
    ("/tools", "List available MCP tools"),
    ("/config", "Show the effective configuration"),
    ("/decode", "Decode an image file and show its format and size"),
    ("/preprocess", "Run the pipeline on an image file (ops: denoise enhance resize)"),
    ("/recognize", "Recognize the captcha in an image file"),
    ("/clear", "Clear the screen"),
    ("/help", "Show available commands"),
    ("/exit", "Quit the REPL"),
];

/// Commands whose first argument is an image path.
const FILE_COMMANDS: &[&str] = &["/decode", "/preprocess", "/recognize"];

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp"];

/// REPL helper for tab completion.
#[derive(Default)]
struct CaptchaHelper;

impl Completer for CaptchaHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let input = &line[..pos];

        if !input.contains(' ') {
            let matches: Vec<Pair> = COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(input))
                .map(|(cmd, desc)| Pair {
                    display: format!("{cmd:<16} {desc}"),
                    replacement: format!("{cmd} "),
                })
                .collect();
            return Ok((0, matches));
        }

        let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
        if !FILE_COMMANDS.contains(&cmd) || args.contains(' ') {
            return Ok((pos, Vec::new()));
        }

        // Image file completion, relative to the directory typed so far.
        let (dir, prefix) = match args.rfind('/') {
            Some(i) => (&args[..=i], &args[i + 1..]),
            None => ("", args),
        };
        let search = if dir.is_empty() { "." } else { dir };

        let mut files = Vec::new();
        if let Ok(entries) = std::fs::read_dir(search) {
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                    continue;
                };
                if !name.starts_with(prefix) {
                    continue;
                }
                if path.is_dir() {
                    files.push(format!("{name}/"));
                } else if is_image_file(&path) {
                    files.push(name.to_string());
                }
            }
        }
        files.sort();

        let start = pos - prefix.len();
        let matches = files
            .into_iter()
            .map(|f| Pair {
                replacement: if f.ends_with('/') { f.clone() } else { format!("{f} ") },
                display: f,
            })
            .collect();
        Ok((start, matches))
    }
}

impl Hinter for CaptchaHelper {
    type Hint = String;

    fn hint(&self, line: &str, pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        if pos < line.len() || line.is_empty() {
            return None;
        }
        if line.starts_with('/') && !line.contains(' ') {
            for (cmd, _) in COMMANDS {
                if cmd.starts_with(line) && *cmd != line {
                    return Some(cmd[line.len()..].to_string());
                }
            }
        }
        None
    }
}

impl Highlighter for CaptchaHelper {}
impl Validator for CaptchaHelper {}
impl Helper for CaptchaHelper {}

struct TabCompleteOrAcceptHint;

impl ConditionalEventHandler for TabCompleteOrAcceptHint {
    fn handle(
        &self,
        _evt: &Event,
        _n: RepeatCount,
        _positive: bool,
        ctx: &EventContext<'_>,
    ) -> Option<Cmd> {
        if ctx.has_hint() {
            Some(Cmd::CompleteHint)
        } else {
            Some(Cmd::Complete)
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Run the interactive REPL.
///
/// Blocks on line input, so call it from a blocking thread; async tool calls
/// are driven on `runtime`.
pub fn run(registry: &ToolRegistry, context: &ToolContext, runtime: &Handle) -> anyhow::Result<()> {
    eprintln!();
    eprintln!(
        "  \x1b[32m\u{25c9}\x1b[0m \x1b[1mcaptcha-vision-mcp v{}\x1b[0m \x1b[90m(captcha recognition for AI agents)\x1b[0m",
        env!("CARGO_PKG_VERSION")
    );
    eprintln!();
    eprintln!(
        "    Press \x1b[36m/\x1b[0m to browse commands, \x1b[90mTab\x1b[0m to complete, \x1b[90m/exit\x1b[0m to quit."
    );
    eprintln!();

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .completion_type(CompletionType::List)
        .completion_prompt_limit(20)
        .build();

    let mut rl: Editor<CaptchaHelper, rustyline::history::DefaultHistory> =
        Editor::with_config(config)?;
    rl.set_helper(Some(CaptchaHelper));
    rl.bind_sequence(
        KeyEvent::from('\t'),
        EventHandler::Conditional(Box::new(TabCompleteOrAcceptHint)),
    );

    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());
    let hist_path = PathBuf::from(&home).join(".captcha_vision_mcp_history");
    if hist_path.exists() {
        let _ = rl.load_history(&hist_path);
    }

    let prompt = " \x1b[36mcaptcha>\x1b[0m ";

    loop {
        match rl.readline(prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let input = line.strip_prefix('/').unwrap_or(line);
                if input.is_empty() {
                    cmd_help();
                    continue;
                }

                let (cmd, args) = input.split_once(' ').unwrap_or((input, ""));
                let args = args.trim();

                match cmd {
                    "exit" | "quit" => {
                        eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                        break;
                    }
                    "help" | "h" | "?" => cmd_help(),
                    "clear" | "cls" => eprint!("\x1b[2J\x1b[H"),
                    "info" => cmd_info(registry, context),
                    "tools" => cmd_tools(registry),
                    "config" => cmd_config(context),
                    "decode" => cmd_decode(args, context),
                    "preprocess" => cmd_preprocess(args, context),
                    "recognize" => cmd_recognize(args, registry, context, runtime),
                    _ => {
                        eprintln!("  Unknown command '/{cmd}'. Type /help for commands.");
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                eprintln!("  \x1b[90m(Ctrl+C)\x1b[0m Type \x1b[1m/exit\x1b[0m to quit.");
            }
            Err(ReadlineError::Eof) => {
                eprintln!("  \x1b[90m\u{2728}\x1b[0m Goodbye!");
                break;
            }
            Err(err) => {
                eprintln!("  Error: {err}");
                break;
            }
        }
    }

    let _ = rl.save_history(&hist_path);

    Ok(())
}

fn cmd_help() {
    eprintln!();
    eprintln!("  Commands:");
    eprintln!();
    for (cmd, desc) in COMMANDS {
        eprintln!("    {cmd:<18} {desc}");
    }
    eprintln!();
    eprintln!("  Tip: Tab completion works for commands and image files.");
    eprintln!();
}

fn cmd_info(registry: &ToolRegistry, context: &ToolContext) {
    let init = InitializeResult::with_tools(registry.list_tools());
    eprintln!();
    eprintln!(
        "  Server:     {} v{}",
        init.server_info.name, init.server_info.version
    );
    eprintln!("  Protocol:   {}", init.protocol_version);
    eprintln!("  Tools:      {}", init.tools.len());
    eprintln!("  Recognizer: {}", context.recognition.name());
    eprintln!();
}

fn cmd_tools(registry: &ToolRegistry) {
    let tools = registry.list_tools();
    eprintln!();
    eprintln!("  {} MCP tools available:", tools.len());
    eprintln!();
    for tool in &tools {
        eprintln!(
            "    {:<28} {}",
            tool.name,
            tool.description.as_deref().unwrap_or("")
        );
    }
    eprintln!();
}

fn cmd_config(context: &ToolContext) {
    let config = &context.config;
    let formats: Vec<&str> = config.accepted_formats.iter().map(|k| k.as_str()).collect();
    eprintln!();
    eprintln!("  Max image size:       {} bytes", config.max_image_bytes);
    eprintln!("  Max image area:       {} pixels", config.max_image_pixels);
    eprintln!("  Max frame size:       {} bytes", config.max_frame_bytes);
    eprintln!("  Accepted formats:     {}", formats.join(", "));
    eprintln!("  Recognition timeout:  {:?}", config.recognition_timeout);
    eprintln!("  Confidence threshold: {}", config.default_confidence_threshold);
    eprintln!(
        "  Enhance factors:      contrast {}, sharpness {}",
        config.default_contrast, config.default_sharpness
    );
    eprintln!(
        "  Resize bounds:        {}x{}",
        config.default_max_width, config.default_max_height
    );
    eprintln!("  Denoise radius:       {}", config.denoise_radius);
    eprintln!("  Max batch size:       {}", config.max_batch_size);
    eprintln!("  Debug errors:         {}", config.debug);
    eprintln!();
}

fn load_image(path: &str, context: &ToolContext) -> Option<ImageBuffer> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("  Cannot read {path}: {e}");
            return None;
        }
    };
    match decode_bytes(bytes, &context.config.decode_limits()) {
        Ok(image) => Some(image),
        Err(e) => {
            eprintln!("  Cannot decode {path}: {e}");
            None
        }
    }
}

fn cmd_decode(args: &str, context: &ToolContext) {
    let Some(path) = args.split_whitespace().next() else {
        eprintln!("  Usage: /decode <image>");
        return;
    };
    let Some(image) = load_image(path, context) else {
        return;
    };
    eprintln!();
    eprintln!("  {path}");
    eprintln!("    Format:     {}", image.kind());
    eprintln!("    Dimensions: {}", image.dimensions());
    eprintln!("    Channels:   {}", image.channels());
    eprintln!();
}

fn cmd_preprocess(args: &str, context: &ToolContext) {
    let mut parts = args.split_whitespace();
    let Some(path) = parts.next() else {
        eprintln!("  Usage: /preprocess <image> [denoise] [enhance] [resize]");
        return;
    };

    let mut operations = Vec::new();
    for name in parts {
        match name.parse::<Operation>() {
            Ok(op) => operations.push(op),
            Err(e) => {
                eprintln!("  {e}");
                return;
            }
        }
    }
    if operations.is_empty() {
        operations.extend(Operation::ALL);
    }

    let Some(image) = load_image(path, context) else {
        return;
    };
    let outcome = match preprocess(&image, &context.preprocess_options(operations)) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("  Preprocessing failed: {e}");
            return;
        }
    };

    let out_path = processed_path(Path::new(path), outcome.image.kind().as_str());
    let written = outcome
        .image
        .encode()
        .map_err(|e| e.to_string())
        .and_then(|bytes| std::fs::write(&out_path, bytes).map_err(|e| e.to_string()));

    let applied: Vec<&str> = outcome.applied.iter().map(|op| op.as_str()).collect();
    eprintln!();
    eprintln!("  Applied:   {}", applied.join(" -> "));
    eprintln!(
        "  Size:      {} -> {}",
        image.dimensions(),
        outcome.image.dimensions()
    );
    eprintln!("  Elapsed:   {:?}", outcome.elapsed);
    match written {
        Ok(()) => eprintln!("  Saved:     {}", out_path.display()),
        Err(e) => eprintln!("  Not saved: {e}"),
    }
    eprintln!();
}

/// `captcha.png` becomes `captcha.processed.png` next to the original.
fn processed_path(path: &Path, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    path.with_file_name(format!("{stem}.processed.{extension}"))
}

fn cmd_recognize(args: &str, registry: &ToolRegistry, context: &ToolContext, runtime: &Handle) {
    let Some(path) = args.split_whitespace().next() else {
        eprintln!("  Usage: /recognize <image>");
        return;
    };

    let arguments = serde_json::json!({ "file_path": path });
    let result = runtime.block_on(registry.call("captcha_recognize_file", Some(arguments), context));

    match result {
        Ok(result) => {
            eprintln!();
            for block in &result.content {
                if let ToolContent::Text { text } = block {
                    for line in text.lines() {
                        eprintln!("  {line}");
                    }
                }
            }
            eprintln!();
        }
        Err(e) => eprintln!("  Recognition failed: {e}"),
    }
}
