//! HTML pages. Every piece of user-supplied text goes through [`escape`].

use log::error;

use crate::dashboard::DayCounts;
use crate::desk::{AdminList, Dashboard};
use crate::feedback::{Feedback, Submitter};

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<link rel="stylesheet" href="/style.css">
</head>
<body>
{body}
</body>
</html>
"#,
        title = escape(title),
    )
}

/// A bare message with a link onwards, for outcomes that don't need a page.
pub fn message(text: &str, link: Option<(&str, &str)>) -> String {
    let mut body = format!("<h2>{}</h2>", escape(text));
    if let Some((href, label)) = link {
        body.push_str(&format!("<a href=\"{}\">{}</a>", escape(href), escape(label)));
    }
    page(text, &body)
}

pub fn index() -> String {
    page(
        "Feedback",
        r#"<h1>Send us your feedback</h1>
<form method="post" action="/submit">
<label>Name <input name="name"></label>
<label>Email <input name="email" type="email"></label>
<label>Message <textarea name="message"></textarea></label>
<button type="submit">Submit</button>
</form>
<p><a href="/login">Login</a> | <a href="/register">Register</a></p>"#,
    )
}

pub fn thanks() -> String {
    message("Thank you for your feedback!", Some(("/", "Go Back")))
}

pub fn register() -> String {
    page(
        "Register",
        r#"<h1>Register</h1>
<form method="post" action="/register">
<label>Username <input name="username" required></label>
<label>Email <input name="email" type="email"></label>
<label>Password <input name="password" type="password" required></label>
<button type="submit">Register</button>
</form>
<p><a href="/login">Already registered?</a></p>"#,
    )
}

pub fn login() -> String {
    page(
        "Login",
        r#"<h1>Login</h1>
<form method="post" action="/login">
<label>Username <input name="username" required></label>
<label>Password <input name="password" type="password" required></label>
<button type="submit">Login</button>
</form>
<p><a href="/register">Register</a></p>"#,
    )
}

/// Chart data for client-side scripts. `</` is escaped so the JSON can't
/// close the script element.
fn counts_json(counts: &DayCounts) -> String {
    serde_json::to_string(counts)
        .map(|json| json.replace("</", "<\\/"))
        .unwrap_or_else(|e| {
            error!("couldn't serialise counts: {e:?}");
            r#"{"labels":[],"counts":[]}"#.into()
        })
}

fn feedback_row(out: &mut String, fb: &Feedback) {
    out.push_str(&format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
        escape(&fb.name),
        escape(&fb.email),
        escape(&fb.message),
        fb.created,
    ));
}

pub fn dashboard(dash: &Dashboard) -> String {
    let mut body = format!(
        r#"<h1>Dashboard</h1>
<p><a href="/admin/feedbacks">Manage feedback</a> | <a href="/logout">Logout</a></p>
<form method="get" action="/dashboard">
<input name="search" value="{}" placeholder="Search name or email">
<button type="submit">Search</button>
</form>
"#,
        escape(&dash.search),
    );

    body.push_str("<h2>Feedback per day</h2>\n<ul class=\"counts\">\n");
    for (label, count) in dash.counts.labels.iter().zip(&dash.counts.counts) {
        body.push_str(&format!("<li>{}: {count}</li>\n", escape(label)));
    }
    body.push_str("</ul>\n");
    body.push_str(&format!(
        "<script id=\"feedback-counts\" type=\"application/json\">{}</script>\n",
        counts_json(&dash.counts),
    ));

    body.push_str(
        "<table>\n<tr><th>Name</th><th>Email</th><th>Message</th><th>Submitted</th></tr>\n",
    );
    for fb in &dash.feedbacks {
        feedback_row(&mut body, fb);
    }
    body.push_str("</table>");

    page("Dashboard", &body)
}

fn submitter(s: &Submitter) -> String {
    match s {
        Submitter::Anonymous => "-".into(),
        Submitter::User(name) => escape(name),
        Submitter::Unknown => "unknown".into(),
    }
}

pub fn feedbacks(list: &AdminList) -> String {
    let mut body = String::from("<h1>All feedback</h1>\n");

    if let Some(success) = &list.success {
        body.push_str(&format!("<p class=\"success\">{}</p>\n", escape(success)));
    }

    body.push_str(
        "<table>\n<tr><th>Name</th><th>Email</th><th>Message</th><th>User</th><th>Submitted</th><th></th></tr>\n",
    );
    for attributed in &list.feedbacks {
        let fb = &attributed.feedback;
        body.push_str(&format!(
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><a href="/feedbacks/{id}/edit">Edit</a> <form method="post" action="/feedbacks/{id}/delete"><button type="submit">Delete</button></form></td></tr>"#,
            escape(&fb.name),
            escape(&fb.email),
            escape(&fb.message),
            submitter(&attributed.submitter),
            fb.created,
            id = fb.id,
        ));
        body.push('\n');
    }
    body.push_str("</table>\n<p><a href=\"/dashboard\">Dashboard</a></p>");

    page("All feedback", &body)
}

pub fn edit_feedback(fb: &Feedback) -> String {
    let body = format!(
        r#"<h1>Edit feedback</h1>
<form method="post" action="/feedbacks/{id}/update">
<label>Name <input name="name" value="{name}"></label>
<label>Email <input name="email" value="{email}"></label>
<label>Message <textarea name="message">{message}</textarea></label>
<button type="submit">Save</button>
</form>
<p><a href="/admin/feedbacks">Back</a></p>"#,
        id = fb.id,
        name = escape(&fb.name),
        email = escape(&fb.email),
        message = escape(&fb.message),
    );

    page("Edit feedback", &body)
}
