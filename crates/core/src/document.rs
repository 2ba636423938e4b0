use crate::types::GeneratedVoucher;

/// Amount as printed on vouchers, e.g. `€ 95,00`.
pub fn format_amount(cents: i64, currency: &str) -> String {
    let symbol = match currency.to_lowercase().as_str() {
        "eur" => "€".to_string(),
        "chf" => "CHF".to_string(),
        "usd" => "$".to_string(),
        other => other.to_uppercase(),
    };
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{}{} {},{:02}", sign, symbol, cents / 100, cents % 100)
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn is_safe_photo_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

/// Printable voucher document. All user supplied text is escaped.
pub fn render_voucher_html(voucher: &GeneratedVoucher, currency: &str) -> String {
    let mut body = String::new();
    body.push_str("<h1>Geschenkgutschein</h1>\n");
    body.push_str(&format!(
        "<p class=\"type\">{}</p>\n",
        escape_html(&voucher.voucher_type)
    ));
    body.push_str(&format!(
        "<p class=\"amount\">{}</p>\n",
        escape_html(&format_amount(voucher.amount_cents, currency))
    ));

    if let Some(name) = voucher.recipient_name.as_deref() {
        body.push_str(&format!("<p class=\"recipient\">Für {}</p>\n", escape_html(name)));
    }
    if let Some(name) = voucher.sender_name.as_deref() {
        body.push_str(&format!("<p class=\"sender\">Von {}</p>\n", escape_html(name)));
    }
    if let Some(message) = voucher.message.as_deref() {
        body.push_str(&format!(
            "<blockquote class=\"message\">{}</blockquote>\n",
            escape_html(message).replace('\n', "<br>")
        ));
    }
    if let Some(url) = voucher.photo_url.as_deref().filter(|u| is_safe_photo_url(u)) {
        body.push_str(&format!(
            "<img class=\"photo\" src=\"{}\" alt=\"\">\n",
            escape_html(url)
        ));
    }

    if let Some(address) = voucher.shipping_address.as_ref() {
        let lines: Vec<String> = address.lines().iter().map(|l| escape_html(l)).collect();
        body.push_str(&format!(
            "<address class=\"shipping\">Versand an<br>{}</address>\n",
            lines.join("<br>")
        ));
    }

    body.push_str(&format!(
        "<p class=\"code\">Gutscheincode: <strong>{}</strong></p>\n",
        escape_html(&voucher.security_code)
    ));
    body.push_str(&format!(
        "<p class=\"issued\">Ausgestellt am {}</p>\n",
        voucher.created_at.format("%d.%m.%Y")
    ));

    format!(
        "<!DOCTYPE html>\n<html lang=\"de\">\n<head>\n<meta charset=\"utf-8\">\n<title>Gutschein {}</title>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(&voucher.security_code),
        body
    )
}
