//! Response security-header auditor

use async_trait::async_trait;

use crate::audit_engine::context::ExecutionContext;
use crate::plugin::{
    AuditPlugin, Category, Fix, FixDifficulty, Issue, Offender, PluginResult, Severity,
};

struct HeaderCheck {
    header: &'static str,
    issue_id: &'static str,
    severity: Severity,
    title: &'static str,
    description: &'static str,
    /// Only meaningful over TLS
    https_only: bool,
    fix_minutes: u32,
}

const CHECKS: &[HeaderCheck] = &[
    HeaderCheck {
        header: "content-security-policy",
        issue_id: "missing-csp",
        severity: Severity::High,
        title: "Missing Content-Security-Policy",
        description: "Without a CSP, injected scripts run unrestricted.",
        https_only: false,
        fix_minutes: 60,
    },
    HeaderCheck {
        header: "strict-transport-security",
        issue_id: "missing-hsts",
        severity: Severity::Medium,
        title: "Missing Strict-Transport-Security",
        description: "Browsers may downgrade repeat visits to plain HTTP.",
        https_only: true,
        fix_minutes: 10,
    },
    HeaderCheck {
        header: "x-content-type-options",
        issue_id: "missing-nosniff",
        severity: Severity::Medium,
        title: "Missing X-Content-Type-Options",
        description: "MIME sniffing can reinterpret responses as executable content.",
        https_only: false,
        fix_minutes: 5,
    },
    HeaderCheck {
        header: "x-frame-options",
        issue_id: "missing-frame-options",
        severity: Severity::Medium,
        title: "Missing X-Frame-Options",
        description: "The page can be framed by third-party sites (clickjacking).",
        https_only: false,
        fix_minutes: 5,
    },
    HeaderCheck {
        header: "referrer-policy",
        issue_id: "missing-referrer-policy",
        severity: Severity::Low,
        title: "Missing Referrer-Policy",
        description: "Full URLs leak to third parties through the Referer header.",
        https_only: false,
        fix_minutes: 5,
    },
];

/// Checks the document response for the standard hardening headers and
/// scores the security category from what is present.
pub struct SecurityHeadersPlugin;

#[async_trait]
impl AuditPlugin for SecurityHeadersPlugin {
    fn id(&self) -> &str {
        "security-headers"
    }

    fn version(&self) -> &str {
        "1.0.2"
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<PluginResult> {
        let headers = &ctx.navigation.headers;
        let is_https = ctx.navigation.final_url.starts_with("https://");
        // frame-ancestors in the CSP supersedes X-Frame-Options
        let has_frame_ancestors = headers
            .get("content-security-policy")
            .is_some_and(|v| v.contains("frame-ancestors"));

        let mut checked: u64 = 0;
        let mut present: u64 = 0;
        let mut result = PluginResult::ok(self.id());

        for check in CHECKS {
            if check.https_only && !is_https {
                continue;
            }
            if check.header == "x-frame-options" && has_frame_ancestors {
                checked += 1;
                present += 1;
                continue;
            }
            checked += 1;
            if headers.contains_key(check.header) {
                present += 1;
                continue;
            }
            result = result.with_issue(Issue {
                id: check.issue_id.into(),
                severity: check.severity,
                category: Category::Security,
                title: check.title.into(),
                description: check.description.into(),
                offenders: vec![Offender::new(
                    ctx.navigation.final_url.clone(),
                    format!("response lacks the {} header", check.header),
                )],
                fix: Some(Fix {
                    difficulty: FixDifficulty::Easy,
                    minutes_estimate: check.fix_minutes,
                    example: Some(format!("add `{}` to the server response", check.header)),
                }),
            });
        }

        let score = if checked == 0 {
            100.0
        } else {
            (present as f64 / checked as f64) * 100.0
        };

        Ok(result
            .with_metric("headersChecked", checked)
            .with_metric("headersPresent", present)
            .with_metric("score:security", score.round()))
    }
}
