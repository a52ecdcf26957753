//! `multipart/form-data` parsing for `/predict`

use crate::service::PredictRequest;
use bytes::Bytes;
use hyper::Body;
use multer::{Constraints, Multipart, SizeLimit};
use skinlens_inference::{parse_age, MetadataRecord};
use skinlens_shared::{Result, SkinlensError};
use tracing::debug;

/// Name of the file field carrying the lesion image
pub const IMAGE_FIELD: &str = "image";

#[derive(Debug, Default)]
struct FormFields {
    sex: Option<String>,
    dx_type: Option<String>,
    localization: Option<String>,
    age: Option<String>,
    image: Option<Bytes>,
}

impl FormFields {
    fn text_slot(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "sex" => Some(&mut self.sex),
            "dx_type" => Some(&mut self.dx_type),
            "localization" => Some(&mut self.localization),
            "age" => Some(&mut self.age),
            _ => None,
        }
    }

    fn into_request(self) -> Result<PredictRequest> {
        let sex = require(self.sex, "sex")?;
        let dx_type = require(self.dx_type, "dx_type")?;
        let localization = require(self.localization, "localization")?;
        let age = parse_age(&require(self.age, "age")?)?;
        let image = require(self.image, IMAGE_FIELD)?;

        Ok(PredictRequest {
            metadata: MetadataRecord::new(sex, dx_type, localization, age)?,
            image,
        })
    }
}

fn require<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| SkinlensError::validation(format!("Missing form field `{}`", name)))
}

/// Size limit that `err` reports as exceeded, looking through stream read failures
fn exceeded_limit(err: &multer::Error) -> Option<u64> {
    match err {
        multer::Error::StreamSizeExceeded { limit }
        | multer::Error::FieldSizeExceeded { limit, .. } => Some(*limit),
        multer::Error::StreamReadFailed(inner) => inner
            .downcast_ref::<multer::Error>()
            .and_then(exceeded_limit),
        _ => None,
    }
}

fn multipart_error(err: multer::Error) -> SkinlensError {
    match exceeded_limit(&err) {
        Some(limit) => SkinlensError::validation(format!(
            "Request body exceeds the {} byte upload limit",
            limit
        )),
        None => SkinlensError::validation(format!("Malformed multipart body: {}", err)),
    }
}

/// Reads a `/predict` body into a [`PredictRequest`]
///
/// The first occurrence of each known field is used and unknown fields are
/// skipped. The whole body is capped at `max_bytes`.
pub async fn parse_predict_form(
    content_type: Option<&str>,
    body: Body,
    max_bytes: usize,
) -> Result<PredictRequest> {
    let content_type = content_type.ok_or_else(|| {
        SkinlensError::validation("Expected a multipart/form-data request body")
    })?;
    let boundary = multer::parse_boundary(content_type).map_err(|_| {
        SkinlensError::validation(format!(
            "Expected a multipart/form-data request body, got `{}`",
            content_type
        ))
    })?;

    let constraints =
        Constraints::new().size_limit(SizeLimit::new().whole_stream(max_bytes as u64));
    let mut multipart = Multipart::with_constraints(body, boundary, constraints);
    let mut fields = FormFields::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == IMAGE_FIELD {
            let data = field.bytes().await.map_err(multipart_error)?;
            debug!(bytes = data.len(), "Received image field");
            fields.image.get_or_insert(data);
        } else if let Some(slot) = fields.text_slot(&name) {
            let value = field.text().await.map_err(multipart_error)?;
            slot.get_or_insert(value);
        } else {
            debug!(field = %name, "Ignoring unknown form field");
        }
    }

    fields.into_request()
}
