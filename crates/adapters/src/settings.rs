// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapter config materialization.
//!
//! Before spawn, the workspace receives the adapter's project files rendered
//! from persona data: `.claude/settings.json` (temperature, merged
//! permissions, sandbox, hooks) and `CLAUDE.md` (system prompt plus a
//! Restrictions section). Workspaces are fresh per attempt, so there is
//! never an existing settings file to merge with.

use serde_json::{json, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use wave_core::Permissions;
use wave_manifest::{Adapter, Persona};

/// Materialize adapter project files into a workspace.
///
/// Returns the path of the settings file, passed to the binary via
/// `--settings`.
pub fn materialize_project_files(
    workspace: &Path,
    persona: &Persona,
    adapter: &Adapter,
    system_prompt: &str,
) -> io::Result<PathBuf> {
    let claude_dir = workspace.join(".claude");
    fs::create_dir_all(&claude_dir)?;

    let permissions = Permissions::merge(&adapter.default_permissions, &persona.permissions);

    let settings = render_settings(persona, &permissions);
    let settings_path = claude_dir.join("settings.json");
    fs::write(
        &settings_path,
        serde_json::to_string_pretty(&settings).unwrap_or_else(|_| "{}".to_string()),
    )?;

    let memory = render_memory_file(persona, &permissions, system_prompt);
    fs::write(workspace.join("CLAUDE.md"), memory)?;

    Ok(settings_path)
}

fn render_settings(persona: &Persona, permissions: &Permissions) -> Value {
    let mut settings = json!({
        "permissions": {
            "allow": permissions.allowed_tools,
            "deny": permissions.deny,
        },
    });

    if let Some(temperature) = persona.temperature {
        settings["temperature"] = json!(temperature);
    }

    if let Some(sandbox) = &persona.sandbox {
        settings["sandbox"] = json!({ "allowedDomains": sandbox.allowed_domains });
    }

    if !persona.hooks.is_empty() {
        settings["hooks"] = render_hooks(persona);
    }

    settings
}

/// Claude Code hooks require the nested matcher/hooks structure.
fn render_hooks(persona: &Persona) -> Value {
    let entry = |command: &str| {
        json!([{
            "matcher": "",
            "hooks": [{ "type": "command", "command": command }]
        }])
    };

    let mut hooks = json!({});
    if let Some(command) = &persona.hooks.pre_tool_use {
        hooks["PreToolUse"] = entry(command);
    }
    if let Some(command) = &persona.hooks.post_tool_use {
        hooks["PostToolUse"] = entry(command);
    }
    hooks
}

/// System prompt plus an explicit restrictions section, so the model sees
/// its own limits even if the settings enforcement is bypassed.
fn render_memory_file(persona: &Persona, permissions: &Permissions, system_prompt: &str) -> String {
    let mut out = String::with_capacity(system_prompt.len() + 256);
    out.push_str(system_prompt.trim_end());
    out.push_str("\n\n## Restrictions\n\n");

    if permissions.allowed_tools.is_empty() {
        out.push_str("- Allowed tools: none\n");
    } else {
        out.push_str(&format!(
            "- Allowed tools: {}\n",
            permissions.allowed_tools.join(", ")
        ));
    }
    if !permissions.deny.is_empty() {
        out.push_str(&format!("- Denied tools: {}\n", permissions.deny.join(", ")));
    }
    match &persona.sandbox {
        Some(sandbox) if !sandbox.allowed_domains.is_empty() => {
            out.push_str(&format!(
                "- Network access limited to: {}\n",
                sandbox.allowed_domains.join(", ")
            ));
        }
        _ => out.push_str("- No network access beyond the adapter defaults\n"),
    }

    out
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
