use crate::model::{AlignmentStyle, BordersStyle, CellStyle, FillStyle, FontStyle};
use umya_spreadsheet::structs::{EnumTrait, HorizontalAlignmentValues, VerticalAlignmentValues};
use umya_spreadsheet::{Border, Color, Font, Style};

/// Extract the non-default formatting of a cell. Returns `None` when every
/// attribute is at its default so callers can skip the map entry entirely.
pub fn cell_style_from_style(style: &Style) -> Option<CellStyle> {
    let font = style.get_font().and_then(font_style);
    let fill = style.get_fill().and_then(fill_style);
    let alignment = style.get_alignment().and_then(alignment_style);
    let borders = style.get_borders().and_then(|borders| {
        let descriptor = BordersStyle {
            left: border_side(borders.get_left_border()),
            right: border_side(borders.get_right_border()),
            top: border_side(borders.get_top_border()),
            bottom: border_side(borders.get_bottom_border()),
        };
        if descriptor.left.is_none()
            && descriptor.right.is_none()
            && descriptor.top.is_none()
            && descriptor.bottom.is_none()
        {
            None
        } else {
            Some(descriptor)
        }
    });
    let number_format = style.get_number_format().and_then(|fmt| {
        let code = fmt.get_format_code();
        if code.eq_ignore_ascii_case("general") {
            None
        } else {
            Some(code.to_string())
        }
    });

    let descriptor = CellStyle {
        font,
        fill,
        alignment,
        borders,
        number_format,
    };
    if descriptor.is_default() {
        None
    } else {
        Some(descriptor)
    }
}

/// Normalize the color representations umya surfaces (ARGB string with or
/// without the alpha byte, theme index, indexed palette slot) into one
/// display string. Fully transparent black is the "unset" sentinel.
pub fn normalize_color(color: &Color) -> Option<String> {
    let argb = color.get_argb();
    if !argb.is_empty() {
        let mut argb = argb.to_ascii_uppercase();
        if argb.len() == 6 {
            argb.insert_str(0, "FF");
        }
        if argb == "00000000" {
            return None;
        }
        return Some(argb);
    }

    let theme = *color.get_theme_index();
    if theme != 0 {
        return Some(format!("theme:{theme}"));
    }

    let indexed = *color.get_indexed();
    if indexed != 0 {
        return Some(format!("indexed:{indexed}"));
    }

    None
}

fn font_style(font: &Font) -> Option<FontStyle> {
    let bold = *font.get_bold();
    let italic = *font.get_italic();

    let descriptor = FontStyle {
        name: Some(font.get_name().to_string()).filter(|s| !s.is_empty()),
        size: Some(*font.get_size() as f64).filter(|s| *s > 0.0),
        bold: if bold { Some(true) } else { None },
        italic: if italic { Some(true) } else { None },
        color: normalize_color(font.get_color()),
    };

    if descriptor.name.is_none()
        && descriptor.size.is_none()
        && descriptor.bold.is_none()
        && descriptor.italic.is_none()
        && descriptor.color.is_none()
    {
        None
    } else {
        Some(descriptor)
    }
}

fn fill_style(fill: &umya_spreadsheet::Fill) -> Option<FillStyle> {
    let pattern = fill.get_pattern_fill()?;
    let kind = pattern.get_pattern_type().get_value_string();
    let fg = pattern.get_foreground_color().and_then(normalize_color);
    let bg = pattern.get_background_color().and_then(normalize_color);

    if kind.eq_ignore_ascii_case("none") && fg.is_none() && bg.is_none() {
        return None;
    }

    Some(FillStyle {
        pattern_type: if kind.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(kind.to_string())
        },
        foreground_color: fg,
        background_color: bg,
    })
}

fn alignment_style(alignment: &umya_spreadsheet::Alignment) -> Option<AlignmentStyle> {
    let horizontal = if alignment.get_horizontal() != &HorizontalAlignmentValues::General {
        Some(alignment.get_horizontal().get_value_string().to_string())
    } else {
        None
    };
    let vertical = if alignment.get_vertical() != &VerticalAlignmentValues::Bottom {
        Some(alignment.get_vertical().get_value_string().to_string())
    } else {
        None
    };
    let wrap_text = if *alignment.get_wrap_text() {
        Some(true)
    } else {
        None
    };

    if horizontal.is_none() && vertical.is_none() && wrap_text.is_none() {
        None
    } else {
        Some(AlignmentStyle {
            horizontal,
            vertical,
            wrap_text,
        })
    }
}

fn border_side(border: &Border) -> Option<String> {
    let style = border.get_border_style();
    if style.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(style.to_string())
    }
}
