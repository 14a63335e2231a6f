use serde::{Deserialize, Serialize};

/// Category a single `rsync` argument falls into, for grouping in a
/// diagnostic breakdown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ArgCategory {
    Flag,
    Pattern,
    LinkDest,
    Path,
}

/// One argument paired with a human-readable description of what it does.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArgumentExplanation {
    pub argument: String,
    pub description: String,
    pub category: ArgCategory,
}

/// A full breakdown of a built `rsync` argument vector, useful for a
/// notifier payload or for diagnostics written into a session's log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandExplanation {
    pub arguments: Vec<ArgumentExplanation>,
    pub summary: String,
}

/// Human-readable description for a recognized flag, matching the long-form
/// spelling this crate always emits.
fn explain_flag(flag: &str) -> &'static str {
    match flag {
        "--progress" => "Shows per-file transfer progress (always on: a default flag of every invocation).",
        "--verbose" => "Increases diagnostic output (always on: a default flag of every invocation).",
        "--dry-run" => "Simulates the transfer; no files are written. Used only by sizing probes.",
        "--compress" => "Compresses file data during transfer to reduce bandwidth.",
        "--recursive" => "Descends into subdirectories, transferring the whole subtree in one call.",
        "--dirs" => "Transfers only this directory's immediate entries; subdirectories are created but not descended into.",
        "--times" => "Preserves modification times on transferred files.",
        "--delete" => "Removes destination files that no longer exist on the source, keeping the mirror exact.",
        "--owner" => "Preserves file owner (requires appropriate privileges on the destination).",
        "--group" => "Preserves file group ownership.",
        "--perms" => "Preserves file permission bits.",
        "--links" => "Copies symlinks as symlinks rather than following them.",
        "--devices" => "Preserves device files (requires superuser on the destination).",
        "--specials" => "Preserves special files such as named pipes and sockets.",
        _ => "Unrecognized flag.",
    }
}

fn categorize(arg: &str) -> ArgCategory {
    if arg.starts_with("--include=") || arg.starts_with("--exclude=") {
        ArgCategory::Pattern
    } else if arg.starts_with("--link-dest=") {
        ArgCategory::LinkDest
    } else if arg.starts_with("--") {
        ArgCategory::Flag
    } else {
        ArgCategory::Path
    }
}

fn describe(arg: &str) -> String {
    match categorize(arg) {
        ArgCategory::Pattern => {
            let (prefix, pattern) = arg.split_once('=').unwrap_or((arg, ""));
            if prefix == "--include" {
                format!("Includes files/dirs matching `{}` in an otherwise filtered walk.", pattern)
            } else {
                format!("Excludes files/dirs matching `{}`.", pattern)
            }
        }
        ArgCategory::LinkDest => {
            let path = arg.strip_prefix("--link-dest=").unwrap_or(arg);
            format!("Hard-links unchanged files from the prior backup at `{}` instead of re-copying them.", path)
        }
        ArgCategory::Flag => explain_flag(arg).to_string(),
        ArgCategory::Path => format!("Path operand: `{}`.", arg),
    }
}

/// Explain every argument in `args` (the vector actually handed to `rsync`,
/// including the trailing source/dest operands), plus a one-line summary of
/// the overall call shape.
pub fn explain_command(args: &[String]) -> CommandExplanation {
    let arguments: Vec<ArgumentExplanation> = args
        .iter()
        .map(|arg| ArgumentExplanation {
            argument: arg.clone(),
            description: describe(arg),
            category: categorize(arg),
        })
        .collect();

    let link_dest_count = arguments.iter().filter(|a| a.category == ArgCategory::LinkDest).count();
    let summary = if args.iter().any(|a| a == "--recursive") {
        format!("Recursive transfer of one subtree ({} link-dest donor(s)).", link_dest_count)
    } else if args.iter().any(|a| a == "--dirs") && args.iter().any(|a| a.starts_with("--include=") ) && args.iter().any(|a| a == "--exclude=*") {
        "Directory-only pass honoring a marker-file skip.".to_string()
    } else if args.iter().any(|a| a == "--dirs") {
        format!("Flat transfer of this directory's own files ({} link-dest donor(s)).", link_dest_count)
    } else {
        "Metadata-only probe; no file content is transferred.".to_string()
    };

    CommandExplanation { arguments, summary }
}
