//! Static station identifier to display name table.

/// Resolve a station number to its display name.
///
/// Unknown numbers get a synthesized `Unknown_<number>` label so a freshly
/// deployed station still produces distinguishable archives and metric hosts
/// before this table is updated.
pub fn station_name(number: u8) -> String {
    let name = match number {
        1 => "VC1",
        2 => "BILBAO",
        3 => "RETU",
        4 => "CHONTAL",
        5 => "GPCAM",
        6 => "CAYR",
        7 => "CAYM",
        8 => "PONDOA",
        9 => "COTOR",
        10 => "MANDUR",
        11 => "GGPA",
        _ => return format!("Unknown_{number}"),
    };
    name.to_string()
}
