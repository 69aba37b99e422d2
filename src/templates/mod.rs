//! Server-rendered pages and e-mails
//!
//! Templates live under `templates/` and are embedded in the binary. All of
//! them are loaded into one Tera instance at startup; a broken template fails
//! startup instead of the first request that renders it.

use rust_embed::RustEmbed;
use std::error::Error as _;
use tera::{Context as TeraContext, Tera};

#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.html"]
struct TemplateAssets;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template {0} is not valid UTF-8")]
    Encoding(String),

    #[error("Template error: {0}")]
    Tera(String),
}

pub struct Templates {
    tera: Tera,
}

impl Templates {
    /// Load every embedded template.
    pub fn load() -> Result<Self, TemplateError> {
        let mut templates: Vec<(String, String)> = Vec::new();
        for name in TemplateAssets::iter() {
            let Some(file) = TemplateAssets::get(&name) else {
                continue;
            };
            let content = String::from_utf8(file.data.into_owned())
                .map_err(|_| TemplateError::Encoding(name.to_string()))?;
            templates.push((name.replace('\\', "/"), content));
        }

        // Added in one batch so `extends` resolves regardless of order.
        let mut tera = Tera::default();
        tera.add_raw_templates(templates.iter().map(|(n, c)| (n.as_str(), c.as_str())))
            .map_err(|e| TemplateError::Tera(format!("Failed to add templates: {}", chain(&e))))?;

        tracing::debug!("Loaded {} templates", templates.len());
        Ok(Self { tera })
    }

    pub fn render(&self, template: &str, context: &TeraContext) -> Result<String, TemplateError> {
        self.tera.render(template, context).map_err(|e| {
            TemplateError::Tera(format!("Failed to render '{}': {}", template, chain(&e)))
        })
    }
}

/// Flatten an error and its sources into one message.
fn chain(e: &tera::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        message.push_str(&format!("\n  Caused by: {}", s));
        source = s.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn templates() -> Templates {
        Templates::load().expect("embedded templates should load")
    }

    #[test]
    fn test_all_pages_present() {
        let t = templates();
        let names: Vec<&str> = t.tera.get_template_names().collect();
        for expected in [
            "base.html",
            "login.html",
            "admin/login.html",
            "admin/dashboard.html",
            "admin/user_form.html",
            "account.html",
            "history.html",
            "forgot_password.html",
            "reset_password.html",
            "error.html",
            "partials/command_list.html",
            "partials/api_key_item.html",
            "partials/change_email_form.html",
            "partials/change_password_form.html",
            "emails/password_reset.html",
            "emails/email_verification.html",
        ] {
            assert!(names.contains(&expected), "missing template {}", expected);
        }
    }

    #[test]
    fn test_login_page_carries_csrf_token() {
        let mut ctx = TeraContext::new();
        ctx.insert("csrf_token", "tok-123");
        let html = templates().render("login.html", &ctx).unwrap();
        assert!(html.contains("name=\"csrf_token\""));
        assert!(html.contains("tok-123"));
    }

    #[test]
    fn test_output_is_escaped() {
        let mut ctx = TeraContext::new();
        ctx.insert("csrf_token", "t");
        ctx.insert("error", "<script>alert(1)</script>");
        let html = templates().render("login.html", &ctx).unwrap();
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_reset_email() {
        let ctx = TeraContext::from_serialize(json!({
            "username": "alice",
            "reset_url": "https://example.com/reset-password?token=abc",
        }))
        .unwrap();
        let html = templates().render("emails/password_reset.html", &ctx).unwrap();
        assert!(html.contains("alice"));
        assert!(html.contains("token=abc"));
    }

    #[test]
    fn test_admin_login_extends_login_page() {
        let mut ctx = TeraContext::new();
        ctx.insert("csrf_token", "tok-456");
        let html = templates().render("admin/login.html", &ctx).unwrap();
        assert!(html.contains("action=\"/admin/login\""));
        assert!(html.contains("tok-456"));
    }

    #[test]
    fn test_dashboard_renders_user_rows() {
        let ctx = TeraContext::from_serialize(json!({
            "csrf_token": "t",
            "total": 1,
            "page": 0,
            "has_more": false,
            "users": [{
                "id": "7f1e2d3c-0000-4000-8000-000000000001",
                "username": "alice",
                "email": "alice@example.com",
                "role": "admin",
                "is_active": true,
                "created_at": "2024-01-02T03:04:05Z",
                "has_api_key": true,
            }],
        }))
        .unwrap();
        let html = templates().render("admin/dashboard.html", &ctx).unwrap();
        assert!(html.contains("alice@example.com"));
        assert!(html.contains("/admin/users/7f1e2d3c-0000-4000-8000-000000000001/toggle"));
        assert!(html.contains("2024-01-02"));
    }

    #[test]
    fn test_unknown_template() {
        let result = templates().render("nope.html", &TeraContext::new());
        assert!(matches!(result, Err(TemplateError::Tera(_))));
    }
}
