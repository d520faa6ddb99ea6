use crate::domain::UserReceiptContext;

use super::validate::ReceiptDraft;

const JSON_SHAPE: &str = r#"{
  "storeName": "store name",
  "storeLocation": "store address or empty string",
  "items": [
    {
      "name": "item name (corrected if OCR error)",
      "price": 1.50,
      "quantity": 1,
      "suggestedItemCategory": "category name or null",
      "matchedExistingItem": "exact existing item name or null"
    }
  ],
  "totalAmount": 10.50,
  "date": "DD/MM/YYYY or null",
  "time": "HH:MM or null",
  "suggestedExpenseCategory": "expense category name or null"
}"#;

const EXTRACTION_RULES: &str = "Rules:
- prices must be positive numbers
- quantity defaults to 1 if not specified
- date format: DD/MM/YYYY
- time format: HH:MM (24h)
- if a field cannot be determined, use null
- correct obvious OCR errors in item names (e.g. \"Mie11\" -> \"Miell\", \"Qum3sht\" -> \"Qumësht\")
- do NOT include tax lines, subtotals, or promotional text as items
- matchedExistingItem should be the exact name of a matching existing item, or null if no match";

const MATCHING_RULES: &str = "When matching items:
- If an OCR item name is similar to an existing item (e.g. \"Mie11\" matches \"Miell\"), set matchedExistingItem to the existing item's exact name
- For suggestedItemCategory, prefer existing categories listed above
- For suggestedExpenseCategory, pick the most appropriate expense category from the list above";

fn list_or_none(entries: Vec<String>) -> String {
    if entries.is_empty() {
        "none".to_string()
    } else {
        entries.join(", ")
    }
}

/// The user-specific section of the parse prompt.
pub fn context_section(context: &UserReceiptContext, max_items: usize) -> String {
    let items = list_or_none(
        context
            .items
            .iter()
            .take(max_items)
            .map(|i| format!("{} ({})", i.name, i.category_name))
            .collect(),
    );
    let item_categories = list_or_none(
        context
            .item_categories
            .iter()
            .map(|c| c.name.clone())
            .collect(),
    );
    let expense_categories = list_or_none(
        context
            .expense_categories
            .iter()
            .map(|c| {
                if c.requires_store {
                    format!("{} (store)", c.name)
                } else {
                    c.name.clone()
                }
            })
            .collect(),
    );

    format!(
        "User's existing items: {}\nItem categories: {}\nExpense categories: {}\n\n{}\n",
        items, item_categories, expense_categories, MATCHING_RULES
    )
}

pub fn parse_prompt(ocr_text: &str, context: Option<&UserReceiptContext>, max_items: usize) -> String {
    let context = context
        .map(|c| format!("\n{}", context_section(c, max_items)))
        .unwrap_or_default();

    format!(
        "Extract structured data from this receipt OCR text. Return ONLY valid JSON, no other text.\n{}\nOCR Text:\n{}\n\nReturn JSON with this exact structure:\n{}\n\n{}",
        context, ocr_text, JSON_SHAPE, EXTRACTION_RULES
    )
}

pub fn normalize_prompt(draft: &ReceiptDraft) -> Result<String, serde_json::Error> {
    let input = serde_json::to_string_pretty(draft)?;
    Ok(format!(
        "Review and normalize this parsed receipt data. Return ONLY valid JSON, no other text.

Input:
{}

Tasks:
1. Fix any remaining item name typos or OCR artifacts
2. Remove duplicated lines produced by OCR artifacts
3. Remove junk items (tax lines, subtotals, promotional text, discount lines that were incorrectly parsed as items)
4. Correct obviously wrong prices (e.g. negative prices, prices that are clearly misread)
5. Ensure quantities are positive numbers
6. Validate that categories make sense for the items
7. Keep the same JSON structure as the input

Return the cleaned JSON with the same structure.",
        input
    ))
}
