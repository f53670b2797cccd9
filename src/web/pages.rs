//! # Admin Console Pages
//!
//! Minimal HTML rendering for the admin console. Markup is intentionally
//! plain; the console is an operator tool, not a product surface. All
//! user-controlled strings pass through [`escape_html`].

use crate::images::ImageInfo;
use crate::store::{AccessMode, Entry};

/// Escape HTML special characters
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Wrap page content in the shared document shell
pub fn render_page(title: &str, content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
         <title>{} - Keywords Reply</title>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        content
    )
}

/// Shared navigation header
pub fn render_nav() -> String {
    "<nav><a href=\"/\">Dashboard</a> | <a href=\"/keywords\">Keywords</a> | \
     <a href=\"/detects\">Detect words</a> | <a href=\"/images\">Images</a> | \
     <a href=\"/logout\">Logout</a></nav><hr>"
        .to_string()
}

/// Login form, optionally with an error banner
pub fn render_login(error: Option<&str>, csrf_token: &str) -> String {
    let error_html = error
        .map(|e| format!("<p class=\"error\">{}</p>", escape_html(e)))
        .unwrap_or_default();
    let content = format!(
        "<h1>Keywords Reply Admin</h1>\n{}\
         <form method=\"post\" action=\"/login\">\n\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{}\">\n\
         <label>Password <input type=\"password\" name=\"password\" autofocus></label>\n\
         <button type=\"submit\">Log in</button>\n</form>",
        error_html,
        escape_html(csrf_token)
    );
    render_page("Login", &content)
}

/// Dashboard with collection counts
pub fn render_dashboard(keywords: usize, detects: usize, images: usize) -> String {
    let content = format!(
        "{}\n<h1>Dashboard</h1>\n<ul>\n\
         <li>Keywords (command-triggered): {}</li>\n\
         <li>Detect words (auto-detect): {}</li>\n\
         <li>Stored images: {}</li>\n</ul>",
        render_nav(),
        keywords,
        detects,
        images
    );
    render_page("Dashboard", &content)
}

fn entry_state(entry: &Entry) -> String {
    if !entry.enabled {
        return "disabled".to_string();
    }
    match (entry.mode, entry.groups.is_empty()) {
        (AccessMode::Blacklist, true) => "enabled everywhere".to_string(),
        (AccessMode::Blacklist, false) => {
            format!("blacklist: {}", escape_html(&entry.groups.join(",")))
        }
        (AccessMode::Whitelist, true) => "no groups enabled".to_string(),
        (AccessMode::Whitelist, false) => {
            format!("whitelist: {}", escape_html(&entry.groups.join(",")))
        }
    }
}

fn reply_preview(entry: &Entry) -> String {
    entry
        .replies
        .first()
        .map(|r| {
            let mut preview = r.text.chars().take(50).collect::<String>();
            if !r.images.is_empty() {
                preview.push_str(&" [image]".repeat(r.images.len()));
            }
            escape_html(&preview)
        })
        .unwrap_or_default()
}

fn render_entry_form(api_path: &str, with_regex: bool, idx: Option<usize>, entry: Option<&Entry>, csrf_token: &str) -> String {
    let (action, keyword, reply_text, reply_images, groups, is_regex, blacklist) = match (idx, entry) {
        (Some(i), Some(e)) => (
            format!(
                "<input type=\"hidden\" name=\"action\" value=\"edit\">\n\
                 <input type=\"hidden\" name=\"idx\" value=\"{}\">",
                i
            ),
            escape_html(&e.keyword),
            e.replies
                .first()
                .map(|r| escape_html(&r.text))
                .unwrap_or_default(),
            e.replies
                .first()
                .map(|r| {
                    r.images
                        .iter()
                        .filter_map(|img| match img {
                            crate::store::ImageRef::Local { path } => Some(escape_html(path)),
                            crate::store::ImageRef::Remote { .. } => None,
                        })
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default(),
            escape_html(&e.groups.join(",")),
            e.is_regex,
            e.mode == AccessMode::Blacklist,
        ),
        _ => (
            "<input type=\"hidden\" name=\"action\" value=\"add\">".to_string(),
            String::new(),
            String::new(),
            String::new(),
            String::new(),
            false,
            false,
        ),
    };

    let regex_field = if with_regex {
        format!(
            "<label><input type=\"checkbox\" name=\"is_regex\" {}> Regular expression</label>\n",
            if is_regex { "checked" } else { "" }
        )
    } else {
        String::new()
    };

    format!(
        "<form method=\"post\" action=\"{}\">\n\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{}\">\n{}\n\
         <label>Keyword <input type=\"text\" name=\"keyword\" value=\"{}\"></label>\n\
         <label>Reply text <textarea name=\"reply_text\">{}</textarea></label>\n\
         <label>Reply images (stored filenames, comma-separated) \
         <input type=\"text\" name=\"reply_images\" value=\"{}\"></label>\n{}\
         <label>Mode <select name=\"mode\">\
         <option value=\"whitelist\"{}>whitelist</option>\
         <option value=\"blacklist\"{}>blacklist</option></select></label>\n\
         <label>Groups (comma-separated) <input type=\"text\" name=\"groups\" value=\"{}\"></label>\n\
         <button type=\"submit\">Save</button>\n</form>",
        api_path,
        escape_html(csrf_token),
        action,
        keyword,
        reply_text,
        reply_images,
        regex_field,
        if !blacklist { " selected" } else { "" },
        if blacklist { " selected" } else { "" },
        groups
    )
}

/// Entry list page for either collection.
///
/// `action`/`idx` come from the query string and select the rendered form;
/// `search` filters the listed keywords by substring.
#[allow(clippy::too_many_arguments)]
pub fn render_entries(
    title: &str,
    api_path: &str,
    page_path: &str,
    with_regex: bool,
    entries: &[Entry],
    action: Option<&str>,
    idx: Option<usize>,
    search: Option<&str>,
    csrf_token: &str,
) -> String {
    let mut content = format!("{}\n<h1>{}</h1>\n", render_nav(), escape_html(title));

    match action {
        Some("add") => content.push_str(&render_entry_form(api_path, with_regex, None, None, csrf_token)),
        Some("edit") => {
            if let Some(entry) = idx.and_then(|i| entries.get(i)) {
                content.push_str(&render_entry_form(api_path, with_regex, idx, Some(entry), csrf_token));
            } else {
                content.push_str("<p>No such entry.</p>");
            }
        }
        _ => {
            content.push_str(&format!(
                "<p><a href=\"{}?action=add\">Add entry</a></p>\n\
                 <form method=\"get\" action=\"{}\">\
                 <input type=\"text\" name=\"search\" value=\"{}\" placeholder=\"filter\">\
                 <button type=\"submit\">Search</button></form>\n",
                page_path,
                page_path,
                escape_html(search.unwrap_or(""))
            ));
            content.push_str("<table>\n<tr><th>#</th><th>Keyword</th><th>State</th><th>Replies</th><th>Preview</th><th></th></tr>\n");
            for (i, entry) in entries.iter().enumerate() {
                if let Some(filter) = search {
                    if !filter.is_empty() && !entry.keyword.contains(filter) {
                        continue;
                    }
                }
                let regex_tag = if entry.is_regex { " [regex]" } else { "" };
                content.push_str(&format!(
                    "<tr><td>{}</td><td>{}{}</td><td>{}</td><td>{}</td><td>{}</td>\
                     <td><a href=\"{}?action=edit&idx={}\">edit</a>\n\
                     <form method=\"post\" action=\"{}\">\
                     <input type=\"hidden\" name=\"csrf_token\" value=\"{}\">\
                     <input type=\"hidden\" name=\"action\" value=\"delete\">\
                     <input type=\"hidden\" name=\"idx\" value=\"{}\">\
                     <button type=\"submit\">delete</button></form></td></tr>\n",
                    i + 1,
                    escape_html(&entry.keyword),
                    regex_tag,
                    entry_state(entry),
                    entry.replies.len(),
                    reply_preview(entry),
                    page_path,
                    i,
                    api_path,
                    escape_html(csrf_token),
                    i
                ));
            }
            content.push_str("</table>");
        }
    }

    render_page(title, &content)
}

/// Image management page: upload form plus stored-image table
pub fn render_images(images: &[ImageInfo], csrf_token: &str) -> String {
    let mut content = format!(
        "{}\n<h1>Images</h1>\n\
         <form method=\"post\" action=\"/api/images\" enctype=\"multipart/form-data\">\n\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{}\">\n\
         <input type=\"file\" name=\"image\" accept=\".jpg,.jpeg,.png,.gif,.webp\">\n\
         <button type=\"submit\">Upload</button>\n</form>\n\
         <table>\n<tr><th>Preview</th><th>Filename</th><th>Size</th><th>Modified</th><th></th></tr>\n",
        render_nav(),
        escape_html(csrf_token)
    );
    for image in images {
        content.push_str(&format!(
            "<tr><td><img src=\"/api/images/{name}\" alt=\"{name}\" height=\"48\"></td>\
             <td>{name}</td><td>{size}</td><td>{modified}</td>\
             <td><form method=\"post\" action=\"/api/images\">\
             <input type=\"hidden\" name=\"csrf_token\" value=\"{csrf}\">\
             <input type=\"hidden\" name=\"action\" value=\"delete\">\
             <input type=\"hidden\" name=\"filename\" value=\"{name}\">\
             <button type=\"submit\">delete</button></form></td></tr>\n",
            name = escape_html(&image.filename),
            size = image.size_bytes,
            modified = image.modified.format("%Y-%m-%d %H:%M"),
            csrf = escape_html(csrf_token),
        ));
    }
    content.push_str("</table>");
    render_page("Images", &content)
}
