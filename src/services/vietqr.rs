//! VietQR payload construction.
//!
//! Builds the EMVCo merchant-presented QR payload used by Vietnamese
//! banking apps (NAPAS 247 transfer-to-account), renders it to a PNG and
//! builds an img.vietqr.io URL for clients that prefer a hosted image.

use crate::errors::ServiceError;
use image::{ImageFormat, Luma};
use qrcode::QrCode;
use rust_decimal::Decimal;
use std::io::Cursor;
use url::Url;

const PAYLOAD_FORMAT_INDICATOR: &str = "01";
// 12 = dynamic QR, single use.
const POINT_OF_INITIATION: &str = "12";
const NAPAS_GUID: &str = "A000000727";
const SERVICE_CODE_TO_ACCOUNT: &str = "QRIBFTTA";
const CURRENCY_VND: &str = "704";
const COUNTRY_CODE: &str = "VN";

/// Everything needed to assemble one transfer payload.
#[derive(Debug, Clone)]
pub struct VietQrRequest<'a> {
    pub bank_code: &'a str,
    pub account_number: &'a str,
    pub account_name: &'a str,
    pub amount: Decimal,
    pub description: &'a str,
}

/// One TLV field: two-digit id, two-digit length, value.
fn tlv(id: &str, value: &str) -> String {
    format!("{}{:02}{}", id, value.len(), value)
}

/// CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF), as mandated by EMVCo.
fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Amounts are VND; banking apps reject decimal points, so the value is
/// rendered without a fractional part when it is whole.
fn format_amount(amount: Decimal) -> String {
    amount.normalize().to_string()
}

/// Assembles the deterministic EMVCo TLV payload. Same inputs always
/// produce the same string, CRC included.
pub fn generate_vietqr_data(req: &VietQrRequest<'_>) -> String {
    let account_info = tlv("00", req.bank_code) + &tlv("01", req.account_number);
    let merchant_account = tlv("00", NAPAS_GUID)
        + &tlv("01", &account_info)
        + &tlv("02", SERVICE_CODE_TO_ACCOUNT);
    let additional_data = tlv("08", req.description);

    let mut payload = String::new();
    payload.push_str(&tlv("00", PAYLOAD_FORMAT_INDICATOR));
    payload.push_str(&tlv("01", POINT_OF_INITIATION));
    payload.push_str(&tlv("38", &merchant_account));
    payload.push_str(&tlv("53", CURRENCY_VND));
    payload.push_str(&tlv("54", &format_amount(req.amount)));
    payload.push_str(&tlv("58", COUNTRY_CODE));
    payload.push_str(&tlv("59", req.account_name));
    payload.push_str(&tlv("62", &additional_data));

    // The CRC field covers its own id and length.
    payload.push_str("6304");
    let crc = crc16_ccitt(payload.as_bytes());
    payload.push_str(&format!("{:04X}", crc));
    payload
}

/// Renders a payload to a PNG, `module_size` pixels per QR module.
pub fn generate_qr_code_image(data: &str, module_size: u32) -> Result<Vec<u8>, ServiceError> {
    let code = QrCode::new(data.as_bytes())
        .map_err(|e| ServiceError::PaymentError(format!("QR encoding failed: {}", e)))?;

    let image = code
        .render::<Luma<u8>>()
        .module_dimensions(module_size.max(1), module_size.max(1))
        .build();

    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ServiceError::PaymentError(format!("PNG encoding failed: {}", e)))?;
    Ok(bytes)
}

/// Builds an img.vietqr.io rendering URL for the same transfer.
pub fn generate_vietqr_image_url(
    base_url: &str,
    req: &VietQrRequest<'_>,
) -> Result<String, ServiceError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| ServiceError::PaymentError(format!("invalid QR image base URL: {}", e)))?;

    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            ServiceError::PaymentError("QR image base URL cannot be a base".to_string())
        })?;
        segments.push(&format!(
            "{}-{}-compact2.png",
            req.bank_code, req.account_number
        ));
    }

    url.query_pairs_mut()
        .append_pair("amount", &format_amount(req.amount))
        .append_pair("addInfo", req.description)
        .append_pair("accountName", req.account_name);

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_request() -> VietQrRequest<'static> {
        VietQrRequest {
            bank_code: "970422",
            account_number: "0123456789",
            account_name: "CONG TY ABC",
            amount: dec!(150000),
            description: "Thanh toan ORD-20260830120000",
        }
    }

    #[test]
    fn crc_reference_value() {
        // Standard check value for CRC-16/CCITT-FALSE.
        assert_eq!(crc16_ccitt(b"123456789"), 0x29B1);
    }

    #[test]
    fn tlv_encodes_two_digit_length() {
        assert_eq!(tlv("00", "01"), "000201");
        assert_eq!(tlv("58", "VN"), "5802VN");
        assert_eq!(tlv("59", "CONG TY ABC"), "5911CONG TY ABC");
    }

    #[test]
    fn payload_is_deterministic() {
        let req = sample_request();
        assert_eq!(generate_vietqr_data(&req), generate_vietqr_data(&req));
    }

    #[test]
    fn payload_structure() {
        let data = generate_vietqr_data(&sample_request());
        assert!(data.starts_with("000201"));
        assert!(data.contains("A000000727"));
        assert!(data.contains("970422"));
        assert!(data.contains("QRIBFTTA"));
        assert!(data.contains("5303704"));
        assert!(data.contains("5802VN"));
        assert!(data.contains("Thanh toan ORD-20260830120000"));

        // Last field is the 4-hex-digit CRC.
        let crc_field = &data[data.len() - 8..];
        assert!(crc_field.starts_with("6304"));
        let body = &data[..data.len() - 4];
        let expected = format!("{:04X}", crc16_ccitt(body.as_bytes()));
        assert_eq!(&crc_field[4..], expected);
    }

    #[test]
    fn amount_renders_without_trailing_zeros() {
        assert_eq!(format_amount(dec!(150000.0000)), "150000");
        assert_eq!(format_amount(dec!(99.50)), "99.5");
    }

    #[test]
    fn image_url_carries_transfer_details() {
        let url =
            generate_vietqr_image_url("https://img.vietqr.io/image", &sample_request()).unwrap();
        assert!(url.starts_with("https://img.vietqr.io/image/970422-0123456789-compact2.png"));
        assert!(url.contains("amount=150000"));
        assert!(url.contains("accountName=CONG+TY+ABC"));
    }

    #[test]
    fn png_bytes_have_png_signature() {
        let data = generate_vietqr_data(&sample_request());
        let bytes = generate_qr_code_image(&data, 4).unwrap();
        assert_eq!(&bytes[..8], &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n']);
    }
}
