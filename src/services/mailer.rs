use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;

use crate::config::Config;
use crate::models::registration::Registration;
use crate::models::ticket::{Ticket, TicketType};

#[derive(thiserror::Error, Debug)]
pub enum MailError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("failed to fetch QR image: {0}")]
    AttachmentFetch(#[from] reqwest::Error),

    #[error("invalid content type: {0}")]
    ContentType(#[from] lettre::message::header::ContentTypeErr),
}

fn ticket_type_label(t: TicketType) -> &'static str {
    match t {
        TicketType::Regular => "Regular",
        TicketType::Member => "Member",
        TicketType::Student => "Student",
        TicketType::Children => "Children",
    }
}

/// Outbound email over SMTP. Two messages leave this system: the order
/// confirmation at registration time and the ticket email (QR codes
/// inlined) after issuance.
#[derive(Clone)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    http: reqwest::Client,
    from: Mailbox,
    bcc: Option<Mailbox>,
    reply_to: Option<Mailbox>,
    event_name: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Result<Self, MailError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.expose_secret().clone(),
            ))
            .build();

        let from: Mailbox =
            format!("{} <{}>", config.mail_from_name, config.mail_from_address).parse()?;
        let bcc = config.mail_bcc.as_deref().map(str::parse).transpose()?;
        let reply_to = config.mail_reply_to.as_deref().map(str::parse).transpose()?;

        Ok(Self {
            transport,
            http: reqwest::Client::new(),
            from,
            bcc,
            reply_to,
            event_name: config.event_name.clone(),
        })
    }

    fn base_message(&self, to: Mailbox, subject: &str) -> lettre::message::MessageBuilder {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject);
        if let Some(bcc) = &self.bcc {
            builder = builder.bcc(bcc.clone());
        }
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }
        builder
    }

    /// Confirmation sent right after a registration lands: an order
    /// summary and a reminder that tickets arrive once payment clears.
    #[tracing::instrument(skip(self, registration), fields(registration_id = %registration.id))]
    pub async fn send_registration_email(
        &self,
        registration: &Registration,
    ) -> Result<(), MailError> {
        let to: Mailbox = format!("{} <{}>", registration.name, registration.email).parse()?;
        let subject = format!("{} – registration received", self.event_name);

        let name = html_escape::encode_text(&registration.name);
        let mut rows = String::new();
        for (label, count) in [
            ("Regular", registration.tickets_regular),
            ("Member", registration.tickets_member),
            ("Student", registration.tickets_student),
            ("Children", registration.tickets_children),
        ] {
            if count > 0 {
                rows.push_str(&format!(
                    "<tr><td style=\"padding:4px 12px 4px 0\">{label}</td>\
                     <td style=\"padding:4px 0\">{count}</td></tr>"
                ));
            }
        }

        let html = format!(
            r#"<div style="font-family:sans-serif;max-width:540px;margin:0 auto">
  <h2>Thank you, {name}!</h2>
  <p>We have received your registration for {event}.</p>
  <table style="border-collapse:collapse">{rows}
    <tr><td style="padding:8px 12px 4px 0"><strong>Total</strong></td>
        <td style="padding:8px 0"><strong>{total} tickets / {amount} SEK</strong></td></tr>
  </table>
  <p>Your tickets will be emailed to this address once your payment has
  been confirmed.</p>
</div>"#,
            name = name,
            event = html_escape::encode_text(&self.event_name),
            rows = rows,
            total = registration.total_tickets,
            amount = registration.total_amount,
        );

        let message = self
            .base_message(to, &subject)
            .multipart(MultiPart::alternative_plain_html(
                format!(
                    "Thank you, {}! We have received your registration for {}. \
                     Total: {} tickets / {} SEK. Your tickets will be emailed \
                     once your payment has been confirmed.",
                    registration.name,
                    self.event_name,
                    registration.total_tickets,
                    registration.total_amount
                ),
                html,
            ))?;

        self.transport.send(message).await?;
        tracing::info!("registration confirmation sent");
        Ok(())
    }

    /// Ticket delivery: one section per ticket with its QR image inlined
    /// via a CID attachment, so the codes render without remote-image
    /// loading.
    #[tracing::instrument(skip(self, registration, tickets), fields(registration_id = %registration.id, tickets = tickets.len()))]
    pub async fn send_tickets_email(
        &self,
        registration: &Registration,
        tickets: &[Ticket],
    ) -> Result<(), MailError> {
        let to: Mailbox = format!("{} <{}>", registration.name, registration.email).parse()?;
        let subject = format!("{} – your tickets", self.event_name);

        let name = html_escape::encode_text(&registration.name);
        let mut sections = String::new();
        let mut images = Vec::with_capacity(tickets.len());

        for (i, ticket) in tickets.iter().enumerate() {
            let cid = format!("qr{i}");
            let png = self
                .http
                .get(&ticket.qr_url)
                .send()
                .await?
                .error_for_status()?
                .bytes()
                .await?
                .to_vec();
            images.push((cid.clone(), png));

            sections.push_str(&format!(
                r#"<div style="border:1px solid #ddd;border-radius:8px;padding:16px;margin:12px 0;text-align:center">
  <p style="margin:0 0 4px;font-size:18px"><strong>{no}</strong></p>
  <p style="margin:0 0 12px;color:#666">{label}</p>
  <img src="cid:{cid}" alt="{no}" width="240" height="240" />
</div>"#,
                no = html_escape::encode_text(&ticket.ticket_no),
                label = ticket_type_label(ticket.ticket_type),
                cid = cid,
            ));
        }

        let html = format!(
            r#"<div style="font-family:sans-serif;max-width:540px;margin:0 auto">
  <h2>Here are your tickets, {name}!</h2>
  <p>Show the QR code at the entrance of {event}. Each code admits one
  person and can only be scanned once.</p>
  {sections}
</div>"#,
            name = name,
            event = html_escape::encode_text(&self.event_name),
            sections = sections,
        );

        let mut related = MultiPart::related().singlepart(
            SinglePart::builder()
                .header(ContentType::TEXT_HTML)
                .body(html),
        );
        for (cid, png) in images {
            related = related.singlepart(
                Attachment::new_inline(cid).body(png, ContentType::parse("image/png")?),
            );
        }

        let message = self.base_message(to, &subject).multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(
                    format!(
                        "Your tickets for {}: {}. Show the QR codes from the \
                         HTML version of this email at the entrance.",
                        self.event_name,
                        tickets
                            .iter()
                            .map(|t| t.ticket_no.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                ))
                .multipart(related),
        )?;

        self.transport.send(message).await?;
        tracing::info!("ticket email sent");
        Ok(())
    }
}
