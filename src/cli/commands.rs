use std::fmt::Write as _;
use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::app::{NoteSummary, Workspace};
use crate::auth::RegistrationForm;
use crate::collab::UploadFile;
use crate::editor::{Block, Document};
use crate::error::Error;
use crate::model::{format_timestamp, Note, NoteDraft, NotePatch};
use crate::preview::{mark_matches, search_pattern};
use crate::search::{sorted_tags, Criteria, SortKey};

#[derive(Args, Debug, Clone)]
pub struct RegisterArgs {
    pub email: String,
    /// Name shown in the app
    #[arg(long)]
    pub name: String,
    /// Password (prompted twice if omitted)
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
    pub email: String,
    /// Password (prompted if omitted)
    #[arg(long)]
    pub password: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct BodyArgs {
    /// Plain-text body; each line becomes a paragraph
    #[arg(long, conflicts_with = "html")]
    pub content: Option<String>,
    /// Body as editor markup
    #[arg(long)]
    pub html: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    pub title: String,
    #[command(flatten)]
    pub body: BodyArgs,
    /// Tags separated by spaces or commas; `#` is optional
    #[arg(long)]
    pub tags: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    /// File to attach (repeatable)
    #[arg(long = "attach")]
    pub attach: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[command(flatten)]
    pub body: BodyArgs,
    /// Replaces all tags
    #[arg(long)]
    pub tags: Option<String>,
    /// New category; an empty value clears it
    #[arg(long)]
    pub category: Option<String>,
    /// File to attach (repeatable)
    #[arg(long = "attach")]
    pub attach: Vec<PathBuf>,
    /// Attachment name to remove (repeatable)
    #[arg(long = "detach")]
    pub detach: Vec<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// Case-insensitive text matched against title, content and tags
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub tag: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
    /// updated, created or title (defaults to the configured order)
    #[arg(long)]
    pub sort: Option<SortKey>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TagsArgs {
    /// Only tags containing this text
    pub query: Option<String>,
    /// Alphabetical instead of first-seen order
    #[arg(long)]
    pub sorted: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    pub id: String,
    /// Target directory (defaults to the data directory's exports folder)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

pub fn register(workspace: &mut Workspace, args: RegisterArgs) -> Result<()> {
    let (password, confirm_password) = match args.password {
        Some(password) => (password.clone(), password),
        None => (prompt("Password")?, prompt("Confirm password")?),
    };
    let form = RegistrationForm {
        display_name: args.name,
        email: args.email,
        password,
        confirm_password,
    };
    let errors = form.validate();
    if !errors.is_empty() {
        let lines: Vec<String> = errors
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect();
        bail!("registration form is invalid\n{}", lines.join("\n"));
    }
    let user = workspace
        .register(&form.email, &form.password, &form.display_name)
        .map_err(user_facing)?;
    println!("Welcome, {} ({})", user.display_name, user.email);
    Ok(())
}

pub fn login(workspace: &mut Workspace, args: LoginArgs) -> Result<()> {
    let password = match args.password {
        Some(password) => password,
        None => prompt("Password")?,
    };
    let user = workspace
        .login(&args.email, &password, true)
        .map_err(user_facing)?;
    println!("Signed in as {} ({})", user.display_name, user.email);
    Ok(())
}

pub fn logout(workspace: &mut Workspace) -> Result<()> {
    workspace.logout().map_err(user_facing)?;
    println!("Signed out");
    Ok(())
}

pub fn whoami(workspace: &Workspace) -> Result<()> {
    match workspace.current_user() {
        Some(user) => println!("[{}] {} <{}>", user.initial(), user.display_name, user.email),
        None => println!("Not signed in"),
    }
    Ok(())
}

pub fn new_note(workspace: &Workspace, args: NewArgs) -> Result<()> {
    let content = match resolve_body(&args.body)? {
        Some(markup) => markup,
        None => match read_stdin()? {
            Some(text) => Document::from_plain_text(&text).to_markup(),
            None => Document::new().to_markup(),
        },
    };
    let draft = NoteDraft {
        title: args.title,
        content,
        tags_input: args.tags.unwrap_or_default(),
        category: args.category,
        files: load_files(&args.attach)?,
    };
    let note = workspace
        .create_note(draft, &report_progress)
        .map_err(user_facing)?;
    println!("Created note {}", note.id);
    Ok(())
}

pub fn list_notes(workspace: &mut Workspace, args: ListArgs) -> Result<()> {
    workspace.sync().map_err(user_facing)?;
    let criteria = Criteria {
        search: args.search.unwrap_or_default(),
        tag: args.tag.unwrap_or_default(),
        category: args.category,
        sort: args.sort.unwrap_or(workspace.config().default_sort),
    };
    print!("{}", format_listing(&workspace.summaries(&criteria), &criteria));
    Ok(())
}

pub fn show_note(workspace: &Workspace, id: &str) -> Result<()> {
    let note = workspace.open_note(id).map_err(user_facing)?;
    print!("{}", render_note(&note));
    Ok(())
}

pub fn edit_note(workspace: &Workspace, args: EditArgs) -> Result<()> {
    let mut patch = NotePatch {
        title: args.title,
        content: resolve_body(&args.body)?,
        tags_input: args.tags,
        category: args.category.map(|c| Some(c).filter(|c| !c.trim().is_empty())),
        add_files: load_files(&args.attach)?,
        remove_attachments: Vec::new(),
    };
    if !args.detach.is_empty() {
        let note = workspace.open_note(&args.id).map_err(user_facing)?;
        for name in &args.detach {
            let attachment = note
                .attachments
                .iter()
                .find(|a| &a.name == name || &a.full_path == name)
                .with_context(|| format!("note has no attachment named {name}"))?;
            patch.remove_attachments.push(attachment.full_path.clone());
        }
    }
    if patch.is_empty() {
        bail!("nothing to change");
    }
    let note = workspace
        .update_note(&args.id, patch, &report_progress)
        .map_err(user_facing)?;
    println!("Updated note {}", note.id);
    Ok(())
}

pub fn delete_note(workspace: &Workspace, id: &str) -> Result<()> {
    workspace.delete_note(id).map_err(user_facing)?;
    println!("Deleted note {id}");
    Ok(())
}

pub fn list_tags(workspace: &mut Workspace, args: TagsArgs) -> Result<()> {
    workspace.sync().map_err(user_facing)?;
    let query = args.query.unwrap_or_default();
    let tags: Vec<String> = if args.sorted {
        sorted_tags(workspace.notes())
            .into_iter()
            .filter(|tag| tag.to_lowercase().contains(&query.to_lowercase()))
            .collect()
    } else {
        workspace.tag_choices(&query)
    };
    if tags.is_empty() {
        println!("No tags.");
    }
    for tag in tags {
        println!("{tag}");
    }
    Ok(())
}

pub fn export_note(workspace: &Workspace, id: &str, dir: &Path) -> Result<()> {
    let path = workspace.export_note(id, dir).map_err(user_facing)?;
    println!("Exported to {}", path.display());
    Ok(())
}

/// Auth failures print their friendly text; everything else keeps its chain.
fn user_facing(err: Error) -> anyhow::Error {
    match err {
        Error::Auth(auth) => anyhow::anyhow!(auth.friendly_message()),
        other => anyhow::Error::new(other),
    }
}

fn resolve_body(body: &BodyArgs) -> Result<Option<String>> {
    if let Some(markup) = &body.html {
        let doc = Document::from_markup(markup).context("parsing --html content")?;
        return Ok(Some(doc.to_markup()));
    }
    Ok(body
        .content
        .as_deref()
        .map(|text| Document::from_plain_text(text).to_markup()))
}

fn load_files(paths: &[PathBuf]) -> Result<Vec<UploadFile>> {
    paths.iter().map(|path| UploadFile::from_path(path)).collect()
}

fn report_progress(index: usize, percent: f32) {
    tracing::debug!(file = index, percent, "upload progress");
}

/// Search hits in titles and previews are wrapped in `[` `]`.
fn format_listing(notes: &[NoteSummary], criteria: &Criteria) -> String {
    if notes.is_empty() {
        return if criteria.is_unfiltered() {
            "No notes yet. Create one with `nexonotes new`.\n".to_string()
        } else {
            "No notes found.\n".to_string()
        };
    }
    let pattern = search_pattern(&criteria.search);
    let highlight = |text: &str| match &pattern {
        Some(pattern) => mark_matches(text, pattern, "[", "]"),
        None => text.to_string(),
    };
    let mut out = String::new();
    for note in notes {
        let _ = writeln!(&mut out, "{}  {}", note.id, highlight(&note.title));
        if let Some(updated) = note.updated_at {
            let _ = writeln!(&mut out, "    updated {}", format_timestamp(updated));
        }
        if !note.tags.is_empty() {
            let _ = writeln!(&mut out, "    tags    {}", note.tags.join(" "));
        }
        if let Some(category) = &note.category {
            let _ = writeln!(&mut out, "    in      {category}");
        }
        if note.attachment_count > 0 {
            let _ = writeln!(&mut out, "    files   {}", note.attachment_count);
        }
        if !note.preview.is_empty() {
            let _ = writeln!(&mut out, "    {}", highlight(&note.preview));
        }
        out.push('\n');
    }
    out
}

fn render_note(note: &Note) -> String {
    let mut out = String::new();
    let _ = writeln!(&mut out, "{}", note.title);
    let _ = writeln!(&mut out, "{}", "=".repeat(note.title.chars().count().max(1)));
    if let Some(created) = note.created_at {
        let _ = writeln!(&mut out, "created  {}", format_timestamp(created));
    }
    if let Some(updated) = note.updated_at {
        let _ = writeln!(&mut out, "updated  {}", format_timestamp(updated));
    }
    if let Some(category) = &note.category {
        let _ = writeln!(&mut out, "category {category}");
    }
    if !note.tags.is_empty() {
        let _ = writeln!(&mut out, "tags     {}", note.tags.join(" "));
    }
    out.push('\n');
    write_body(&mut out, &Document::from_markup_lenient(&note.content));
    if !note.attachments.is_empty() {
        out.push_str("\nattachments:\n");
        for attachment in &note.attachments {
            let _ = writeln!(
                &mut out,
                "  {} ({}, {})",
                attachment.name,
                attachment.display_size(),
                attachment.mime_type
            );
        }
    }
    out
}

/// One line per paragraph; list items are prefixed with their marker.
fn write_body(out: &mut String, doc: &Document) {
    for block in doc.blocks() {
        match block {
            Block::Paragraph(line) => {
                let _ = writeln!(out, "{}", line.plain_text());
            }
            Block::List(list) => {
                for (number, item) in (list.start..).zip(&list.items) {
                    let _ = writeln!(out, "{} {}", list.kind.marker(number), item.plain_text());
                }
            }
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}: ")?;
    stdout.flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim_end().to_owned())
}

fn read_stdin() -> Result<Option<String>> {
    if io::stdin().is_terminal() {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf).filter(|text| !text.trim().is_empty()))
}
