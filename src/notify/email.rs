use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::{render_digest, ReportSink};
use crate::pipeline::RunCounters;
use crate::report::WeeklyReport;

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

fn env_required(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("{key} missing"))
}

impl EmailSender {
    /// SMTP_HOST, SMTP_USER, SMTP_PASS, REPORT_EMAIL_FROM and REPORT_EMAIL_TO
    /// (comma separated).
    pub fn from_env() -> Result<Self> {
        let host = env_required("SMTP_HOST")?;
        let user = env_required("SMTP_USER")?;
        let pass = env_required("SMTP_PASS")?;
        let from_addr = env_required("REPORT_EMAIL_FROM")?;
        let to_addrs = env_required("REPORT_EMAIL_TO")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .with_context(|| format!("invalid SMTP_HOST {host}"))?
            .credentials(creds)
            .build();

        let from = from_addr.parse().context("invalid REPORT_EMAIL_FROM")?;
        let to = parse_recipients(&to_addrs)?;
        Ok(Self { mailer, from, to })
    }

    pub fn build_message(&self, report: &WeeklyReport, counters: &RunCounters) -> Result<Message> {
        let subject = format!(
            "[Competitor radar] {} W{:02}: {} updates",
            report.report_date,
            report.week_number,
            report.update_count() + report.overseas_updates.len()
        );
        let json = serde_json::to_string_pretty(report).context("serialize report")?;
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .multipart(
                MultiPart::mixed()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(render_digest(report, counters)),
                    )
                    .singlepart(
                        Attachment::new(format!("report-{}.json", report.report_date))
                            .body(json, header::ContentType::parse("application/json")?),
                    ),
            )
            .context("build email")
    }
}

fn parse_recipients(raw: &str) -> Result<Vec<Mailbox>> {
    let to: Vec<Mailbox> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Mailbox>().with_context(|| format!("invalid recipient {s}")))
        .collect::<Result<_>>()?;
    if to.is_empty() {
        anyhow::bail!("REPORT_EMAIL_TO has no recipients");
    }
    Ok(to)
}

#[async_trait]
impl ReportSink for EmailSender {
    async fn deliver(&self, report: &WeeklyReport, counters: &RunCounters) -> Result<()> {
        let msg = self.build_message(report, counters)?;
        self.mailer.send(msg).await.context("send email")?;
        tracing::info!(recipients = self.to.len(), "report mailed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
