use super::*;

#[test]
fn test_default_settings() {
    let settings = MeasureSettings::default();
    assert!(settings.capacity >= 2);
    assert_eq!(settings.capacity % 2, 0);
    assert!(settings.verify_silence);
}

#[test]
fn test_dbopl_scheduler_measures_a_bank() {
    let mut db = bank::BankDatabase {
        operators: vec![
            bank::OperatorEntry {
                d_e862: 0x0008_f001,
                d_40: 0x3f,
            },
            bank::OperatorEntry {
                d_e862: 0x0008_f001,
                d_40: 0x00,
            },
            bank::OperatorEntry {
                d_e862: 0x0008_0001,
                d_40: 0x00,
            },
        ],
        instruments: vec![
            bank::InstrumentEntry {
                ops: [0, 1, -1, -1],
                ..Default::default()
            },
            bank::InstrumentEntry {
                ops: [0, 2, -1, -1],
                ..Default::default()
            },
        ],
    };
    let scheduler = dbopl_scheduler(MeasureSettings::default());
    scheduler.measure_indexed(&mut db).unwrap();

    let blank = instrument::InstrumentFlags::IS_BLANK;
    assert!(!db.instruments[0].flags().contains(blank));
    assert!(db.instruments[0].delay_on_ms > 0);
    assert!(db.instruments[1].flags().contains(blank));
    assert_eq!(scheduler.compact_cache().len(), 2);
}
