use actix_web::HttpRequest;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locale {
    En,
    Ar,
}

pub fn detect_locale(req: &HttpRequest) -> Locale {
    if let Some(lang) = req.query_string().split('&').find_map(|kv| {
        let mut it = kv.splitn(2, '=');
        let k = it.next()?;
        let v = it.next()?;
        if k == "lang" { Some(v) } else { None }
    }) {
        return match lang.to_ascii_lowercase().as_str() { "ar" | "ar-iq" | "ar-sa" | "ar-eg" => Locale::Ar, _ => Locale::En };
    }

    if let Some(h) = req.headers().get("Accept-Language").and_then(|v| v.to_str().ok()) {
        let hl = h.to_ascii_lowercase();
        if hl.starts_with("ar") { return Locale::Ar; }
    }

    Locale::En
}

/// Column headers for the spreadsheet exports, keyed by a stable column id.
pub fn column_label(locale: Locale, column: &str) -> &'static str {
    match (locale, column) {
        (Locale::Ar, "tracking_number") => "رقم التتبع",
        (Locale::Ar, "sender") => "المرسل",
        (Locale::Ar, "recipient") => "المستلم",
        (Locale::Ar, "recipient_phone") => "هاتف المستلم",
        (Locale::Ar, "governorate") => "المحافظة",
        (Locale::Ar, "weight_kg") => "الوزن (كغ)",
        (Locale::Ar, "shipping_fee") => "أجور الشحن",
        (Locale::Ar, "cod_amount") => "مبلغ التحصيل",
        (Locale::Ar, "currency") => "العملة",
        (Locale::Ar, "status") => "الحالة",
        (Locale::Ar, "created_at") => "تاريخ الإنشاء",
        (Locale::Ar, "date") => "التاريخ",
        (Locale::Ar, "kind") => "النوع",
        (Locale::Ar, "amount") => "المبلغ",
        (Locale::Ar, "customer") => "الزبون",
        (Locale::Ar, "branch") => "الفرع",
        (Locale::Ar, "counter_branch") => "الفرع المقابل",
        (Locale::Ar, "description") => "البيان",
        (Locale::Ar, "driver") => "السائق",
        (Locale::Ar, "trip") => "الرحلة",
        (Locale::Ar, "station") => "المحطة",
        (Locale::Ar, "collected") => "المبلغ المحصل",
        (Locale::Ar, "rate") => "النسبة %",
        (Locale::Ar, "commission") => "العمولة",
        (Locale::Ar, "paid") => "مدفوعة",
        (_, "tracking_number") => "Tracking number",
        (_, "sender") => "Sender",
        (_, "recipient") => "Recipient",
        (_, "recipient_phone") => "Recipient phone",
        (_, "governorate") => "Governorate",
        (_, "weight_kg") => "Weight (kg)",
        (_, "shipping_fee") => "Shipping fee",
        (_, "cod_amount") => "COD amount",
        (_, "currency") => "Currency",
        (_, "status") => "Status",
        (_, "created_at") => "Created at",
        (_, "date") => "Date",
        (_, "kind") => "Type",
        (_, "amount") => "Amount",
        (_, "customer") => "Customer",
        (_, "branch") => "Branch",
        (_, "counter_branch") => "Counter branch",
        (_, "description") => "Description",
        (_, "driver") => "Driver",
        (_, "trip") => "Trip",
        (_, "station") => "Station",
        (_, "collected") => "Collected",
        (_, "rate") => "Rate %",
        (_, "commission") => "Commission",
        (_, "paid") => "Paid",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn query_parameter_wins_over_header() {
        let req = TestRequest::get()
            .uri("/api/shipments?lang=ar")
            .insert_header(("Accept-Language", "en-US"))
            .to_http_request();
        assert_eq!(detect_locale(&req), Locale::Ar);
    }

    #[test]
    fn falls_back_to_header_then_english() {
        let req = TestRequest::get()
            .insert_header(("Accept-Language", "ar-IQ,ar;q=0.9"))
            .to_http_request();
        assert_eq!(detect_locale(&req), Locale::Ar);

        let req = TestRequest::get().to_http_request();
        assert_eq!(detect_locale(&req), Locale::En);
    }

    #[test]
    fn every_english_column_has_an_arabic_label() {
        for col in ["tracking_number", "governorate", "amount", "commission"] {
            assert!(!column_label(Locale::En, col).is_empty());
            assert!(!column_label(Locale::Ar, col).is_empty());
            assert_ne!(column_label(Locale::En, col), column_label(Locale::Ar, col));
        }
    }
}
