use rust_xlsxwriter::{Table, TableColumn, Workbook};

use crate::aac::processors::error::Result;
use crate::aac::processors::flatten::WorkbookData;

/// Renders the workbook tables as `.xlsx` bytes, one worksheet per table with
/// an autofiltered header row.
pub fn render_workbook(workbook: &WorkbookData) -> Result<Vec<u8>> {
    let mut workbook_writer = Workbook::new();

    for table in &workbook.tables {
        let worksheet = workbook_writer.add_worksheet();
        worksheet.set_name(&table.sheet_name)?;

        for (col_idx, header) in table.columns.iter().enumerate() {
            worksheet.write_string(0, col_idx as u16, header)?;
        }

        for (row_idx, row) in table.rows.iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                worksheet.write_string((row_idx + 1) as u32, col_idx as u16, cell)?;
            }
        }

        if table.rows.is_empty() || table.columns.is_empty() {
            continue;
        }
        let headers: Vec<TableColumn> = table
            .columns
            .iter()
            .map(|column| TableColumn::new().set_header(column))
            .collect();
        let mut excel_table = Table::new();
        excel_table.set_autofilter(true).set_columns(&headers);
        let col_end = (table.columns.len() as u16).saturating_sub(1);
        worksheet.add_table(0, 0, table.rows.len() as u32, col_end, &excel_table)?;
    }

    Ok(workbook_writer.save_to_buffer()?)
}
