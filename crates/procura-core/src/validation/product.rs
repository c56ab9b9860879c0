//! Product form schema and whole-form validation.

use serde::{Deserialize, Serialize};

use super::{
    sanitize_string, validate_email, validate_object_id, validate_phone_field,
    validate_serial_code, validate_text, ValidationResult, DEFAULT_TEXT_MAX_LENGTH,
};

/// Maximum length of long free-text fields (description, notes)
pub const LONG_TEXT_MAX_LENGTH: usize = 500;

/// Raw product form as submitted by the UI. Every field arrives as a string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase", default)]
pub struct ProductForm {
    pub category_id: String,
    pub supplier_id: String,
    pub warehouse_id: String,
    pub serial_code: String,
    pub supplier_email: String,
    pub supplier_phone: String,
    /// Optional
    pub contact_phone: String,
    pub name: String,
    pub brand: String,
    pub model: String,
    pub description: String,
    /// Optional
    pub notes: String,
}

/// Validate every field of the form.
///
/// Errors are reported in a fixed order: identifiers, serial code,
/// contact details, then free text.
pub fn validate_product_form(form: &ProductForm) -> ValidationResult {
    let mut results = vec![
        validate_object_id(&form.category_id, "Category"),
        validate_object_id(&form.supplier_id, "Supplier"),
        validate_object_id(&form.warehouse_id, "Warehouse"),
        validate_serial_code(&form.serial_code),
        validate_email(&form.supplier_email),
        validate_phone_field(&form.supplier_phone, "Supplier phone"),
    ];
    if !form.contact_phone.trim().is_empty() {
        results.push(validate_phone_field(&form.contact_phone, "Contact phone"));
    }
    results.push(validate_text(&form.name, "Name", DEFAULT_TEXT_MAX_LENGTH));
    results.push(validate_text(&form.brand, "Brand", DEFAULT_TEXT_MAX_LENGTH));
    results.push(validate_text(&form.model, "Model", DEFAULT_TEXT_MAX_LENGTH));
    results.push(validate_text(
        &form.description,
        "Description",
        LONG_TEXT_MAX_LENGTH,
    ));
    if !form.notes.trim().is_empty() {
        results.push(validate_text(&form.notes, "Notes", LONG_TEXT_MAX_LENGTH));
    }

    results.into_iter().collect()
}

/// Copy of the form with every free-text field sanitized for display.
pub fn sanitize_product_form(form: &ProductForm) -> ProductForm {
    ProductForm {
        name: sanitize_string(Some(&form.name)),
        brand: sanitize_string(Some(&form.brand)),
        model: sanitize_string(Some(&form.model)),
        description: sanitize_string(Some(&form.description)),
        notes: sanitize_string(Some(&form.notes)),
        ..form.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_form() -> ProductForm {
        ProductForm {
            category_id: "507f1f77bcf86cd799439011".to_string(),
            supplier_id: "507f191e810c19729de860ea".to_string(),
            warehouse_id: "5f8d0d55b54764421b7156c9".to_string(),
            serial_code: "PRD-0042".to_string(),
            supplier_email: "orders@acme.example.com".to_string(),
            supplier_phone: "+1 (555) 010-9999".to_string(),
            contact_phone: String::new(),
            name: "Office chair".to_string(),
            brand: "Acme".to_string(),
            model: "OC-200".to_string(),
            description: "Ergonomic chair, adjustable height.".to_string(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_valid_form_passes() {
        let result = validate_product_form(&valid_form());
        assert!(result.is_valid, "unexpected errors: {:?}", result.errors);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_empty_form_reports_required_fields_in_order() {
        let result = validate_product_form(&ProductForm::default());
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec![
                "Category is required",
                "Supplier is required",
                "Warehouse is required",
                "Serial code is required",
                "Email is required",
                "Supplier phone is required",
                "Name is required",
                "Brand is required",
                "Model is required",
                "Description is required",
            ]
        );
    }

    #[test]
    fn test_optional_fields_validated_when_present() {
        let form = ProductForm {
            contact_phone: "123".to_string(),
            notes: "<i>fragile</i>".to_string(),
            ..valid_form()
        };
        let result = validate_product_form(&form);
        assert!(!result.is_valid);
        assert_eq!(
            result.errors,
            vec![
                "Contact phone must be between 8 and 15 characters",
                "Notes contains invalid characters",
            ]
        );
    }

    #[test]
    fn test_error_order_follows_schema() {
        let form = ProductForm {
            name: "Bad <name>".to_string(),
            serial_code: "lower".to_string(),
            warehouse_id: "nope".to_string(),
            supplier_email: "x@y".to_string(),
            ..valid_form()
        };
        let result = validate_product_form(&form);
        assert_eq!(result.errors.len(), 4);
        assert_eq!(result.errors[0], "Warehouse is not a valid identifier");
        assert!(result.errors[1].starts_with("Serial code"));
        assert_eq!(result.errors[2], "Invalid email format");
        assert_eq!(result.errors[3], "Name contains invalid characters");
    }

    #[test]
    fn test_description_allows_long_text() {
        let form = ProductForm {
            description: "a".repeat(LONG_TEXT_MAX_LENGTH),
            ..valid_form()
        };
        assert!(validate_product_form(&form).is_valid);

        let form = ProductForm {
            name: "a".repeat(DEFAULT_TEXT_MAX_LENGTH + 1),
            ..valid_form()
        };
        assert!(!validate_product_form(&form).is_valid);
    }

    #[test]
    fn test_sanitize_product_form_only_touches_free_text() {
        let form = ProductForm {
            name: "  Chair <deluxe>  ".to_string(),
            notes: "Tom's & Jerry's".to_string(),
            ..valid_form()
        };
        let sanitized = sanitize_product_form(&form);
        assert_eq!(sanitized.name, "Chair &lt;deluxe&gt;");
        assert_eq!(sanitized.notes, "Tom&#x27;s &amp; Jerry&#x27;s");
        assert_eq!(sanitized.supplier_email, form.supplier_email);
        assert_eq!(sanitized.category_id, form.category_id);
    }

    #[test]
    fn test_form_deserializes_from_camel_case_json() {
        let json = r#"{"categoryId": "507f1f77bcf86cd799439011", "serialCode": "A1"}"#;
        let form: ProductForm = serde_json::from_str(json).unwrap();
        assert_eq!(form.category_id, "507f1f77bcf86cd799439011");
        assert_eq!(form.serial_code, "A1");
        assert!(form.name.is_empty());
    }
}
