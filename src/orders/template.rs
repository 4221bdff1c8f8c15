// Order confirmation email rendering

use crate::orders::Order;

pub const SHOP_NAME: &str = "Ultra Movie Shop";

const CONFIRMATION_BODY_TEMPLATE: &str = "Dear Customer,

Thank you for your order for renting the following DVD's. They will be reserved and available at our store for pickup over the next 2 weeks.
{cartItems}

Please feel free to contact our helpdesk on 222-333-444 for any queries.

Thank you,
Team Ultra.";

/// A fully rendered message ready for the notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
}

pub fn render_order_confirmation(order: &Order) -> RenderedEmail {
    let items: String = order
        .cart_items
        .iter()
        .map(|item| format!("<li>{}</li>", escape_html(item)))
        .collect();
    let body = CONFIRMATION_BODY_TEMPLATE.replace("{cartItems}", &format!("<ul>{items}</ul>"));

    RenderedEmail {
        to: order.email.clone(),
        subject: format!("{SHOP_NAME} - Order #{} placed successfully", order.order_no),
        html_body: body.replace('\n', "<br/>"),
    }
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderStatus, PaymentMethod};
    use chrono::Utc;
    use uuid::Uuid;

    fn order(items: &[&str]) -> Order {
        Order {
            id: Uuid::new_v4(),
            order_no: 7,
            email: "renter@example.com".to_string(),
            cart_items: items.iter().map(|s| s.to_string()).collect(),
            created: Utc::now(),
            status: OrderStatus::PaymentConfirmed,
            payment_method: PaymentMethod::CardNetwork,
            confirmed: None,
            notified: None,
        }
    }

    #[test]
    fn test_render_lists_every_item() {
        let email = render_order_confirmation(&order(&["tt001", "tt002"]));
        assert_eq!(email.to, "renter@example.com");
        assert_eq!(email.subject, "Ultra Movie Shop - Order #7 placed successfully");
        assert!(email.html_body.contains("<ul><li>tt001</li><li>tt002</li></ul>"));
        assert!(email.html_body.starts_with("Dear Customer,<br/>"));
        assert!(!email.html_body.contains('\n'));
    }

    #[test]
    fn test_render_escapes_titles() {
        let email = render_order_confirmation(&order(&["<script>"]));
        assert!(email.html_body.contains("<li>&lt;script&gt;</li>"));
    }
}
