use crate::context::RenderContext;
use crate::errors::{AppError, AppResult};
use crate::frontmatter::FrontMatter;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Report,
    Append,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Append => "append",
        }
    }
}

/// Turns a render context into markdown. Implementations must be pure.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, kind: TemplateKind, context: &RenderContext) -> AppResult<String>;
}

/// The built-in record layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownTemplates;

impl TemplateEngine for MarkdownTemplates {
    fn render(&self, kind: TemplateKind, context: &RenderContext) -> AppResult<String> {
        let rendered = match kind {
            TemplateKind::Report => render_report(context),
            TemplateKind::Append => render_append(context),
        };
        rendered.map_err(|error| AppError::Template(format!("{} template: {}", kind.as_str(), error)))
    }
}

fn render_report(context: &RenderContext) -> AppResult<String> {
    let front_matter = FrontMatter {
        fileid: Some(context.fileid.clone()),
        locations: context
            .coordinates()
            .map(|(lat, lon)| vec![format!("{},{}", lat, lon)])
            .unwrap_or_default(),
    };

    let mut out = front_matter.render()?;
    writeln!(out)?;
    writeln!(out, "# {}", context.group_title)?;
    writeln!(out)?;
    writeln!(out, "TNR: {} ({})", context.tnr, context.timestamp_iso)?;
    writeln!(out, "Sender: {}", context.sender_display)?;
    writeln!(out, "Group: [[{}]]", context.group_title)?;
    writeln!(out, "Group id: {}", context.group_id)?;
    if let Some(quote) = &context.quote_formatted {
        writeln!(out)?;
        writeln!(out, "{}", quote)?;
    }
    write_tail(&mut out, context)?;
    Ok(out)
}

fn render_append(context: &RenderContext) -> AppResult<String> {
    let mut out = String::from("\n---\n\n");
    match &context.attribution {
        Some(attribution) => writeln!(out, "{}", attribution)?,
        None => writeln!(out, "TNR: {} ({})\nSender: {}", context.tnr, context.timestamp_iso, context.sender_display)?,
    }
    write_tail(&mut out, context)?;
    Ok(out)
}

/// Position, message and attachment sections shared by both templates.
fn write_tail(out: &mut String, context: &RenderContext) -> std::fmt::Result {
    if let Some((lat, lon)) = context.coordinates() {
        writeln!(out)?;
        writeln!(out, "[Position](geo:{},{})", lat, lon)?;
    }
    if let Some(message) = &context.message {
        writeln!(out)?;
        writeln!(out, "## Message")?;
        writeln!(out)?;
        writeln!(out, "{}", message)?;
    }
    if !context.attachments.is_empty() {
        writeln!(out)?;
        writeln!(out, "## Attachments")?;
        writeln!(out)?;
        for embed in &context.attachments {
            writeln!(out, "{}", embed)?;
        }
    }
    Ok(())
}
