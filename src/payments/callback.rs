//! Correlating gateway callbacks with payment rows.
//!
//! Payment ids travel through the gateway round-trip as repeated
//! `payment-ids` query parameters on the caller's callback URL, so a
//! callback can be matched to its payments without any session state.

use url::Url;
use uuid::Uuid;

use crate::errors::CallbackError;
use crate::types::PaymentId;

use super::CallbackData;

pub const PAYMENT_IDS_KEY: &str = "payment-ids";

/// append one `payment-ids` value per id, keeping existing parameters
pub fn callback_url_with_payment_ids(base: &str, ids: &[PaymentId]) -> Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    if !ids.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for id in ids {
            pairs.append_pair(PAYMENT_IDS_KEY, &id.to_string());
        }
    }
    Ok(url)
}

/// collect a url's query string into callback data
pub fn callback_data_from_url(url: &Url) -> CallbackData {
    let mut data = CallbackData::new();
    for (key, value) in url.query_pairs() {
        data.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    data
}

/// parse the payment ids carried by a callback, dropping duplicates
pub fn payment_ids_from(data: &CallbackData) -> Result<Vec<PaymentId>, CallbackError> {
    let values = data
        .get(PAYMENT_IDS_KEY)
        .filter(|v| !v.is_empty())
        .ok_or(CallbackError::MissingPaymentIds)?;

    let mut ids = Vec::with_capacity(values.len());
    for value in values {
        let id = Uuid::parse_str(value).map_err(|source| CallbackError::MalformedPaymentId {
            value: value.clone(),
            source,
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}
