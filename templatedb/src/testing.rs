//! Archive fixtures shared by the unit tests.

use crate::node::{Archive, Embedded, Node, NodeId};

/// Handles into the fixture archive for the nodes tests poke at.
pub struct Fixture {
    pub archive: Archive,
    pub template: NodeId,
    pub day: NodeId,
    pub week: NodeId,
    pub concrete: NodeId,
    pub wall: NodeId,
}

/// Build an `Archive` holding one complete, valid building template.
/// Concrete is shared by several constructions and the structure; the
/// always-on schedule chain is shared by every setting that needs one.
pub fn building_template(name: &str) -> Fixture {
    let mut a = Archive::new();

    let day = a.add(
        Node::new("DaySchedule", "AlwaysOn")
            .with("Type", "Fraction")
            .with("Values", vec![1.0; 24]),
    );
    let week = a.add(
        Node::new("WeekSchedule", "AlwaysOnWeek")
            .with("Type", "Fraction")
            .with("Days", vec![day; 7]),
    );
    let year = a.add(
        Node::new("YearSchedule", "AlwaysOnYear").with(
            "Parts",
            vec![Embedded::new("YearSchedulePart")
                .with("FromDay", 1)
                .with("FromMonth", 1)
                .with("ToDay", 31)
                .with("ToMonth", 12)
                .with("Schedule", week)],
        ),
    );

    let concrete = a.add(
        Node::new("OpaqueMaterial", "Concrete")
            .with("Conductivity", 1.4)
            .with("Density", 2240.0)
            .with("Roughness", "Rough"),
    );
    let insulation = a.add(
        Node::new("OpaqueMaterial", "Insulation")
            .with("Conductivity", 0.04)
            .with("Density", 30.0),
    );
    let glass = a.add(
        Node::new("GlazingMaterial", "Glass")
            .with("SolarTransmittance", 0.8)
            .with("VisibleTransmittance", 0.9),
    );
    let air = a.add(Node::new("GasMaterial", "Air").with("GasType", 0));

    let layer = |material: NodeId, thickness: f64| {
        Embedded::new("MaterialLayer")
            .with("Material", material)
            .with("Thickness", thickness)
    };

    let wall = a.add(
        Node::new("OpaqueConstruction", "Wall")
            .with("Category", "Facade")
            .with(
                "Layers",
                vec![
                    layer(concrete, 0.2),
                    layer(insulation, 0.1),
                    layer(concrete, 0.1),
                ],
            ),
    );
    let floor = a.add(
        Node::new("OpaqueConstruction", "Floor")
            .with("Category", "Ground Floor")
            .with("Layers", vec![layer(concrete, 0.15)]),
    );
    let window = a.add(
        Node::new("WindowConstruction", "DoublePane")
            .with("Layers", vec![layer(glass, 0.006), layer(air, 0.012), layer(glass, 0.006)]),
    );
    let structure = a.add(
        Node::new("StructureInformation", "Structure").with(
            "MassRatios",
            vec![Embedded::new("MassRatio")
                .with("HighLoadRatio", 305.0)
                .with("Material", concrete)
                .with("NormalRatio", 305.0)],
        ),
    );

    let conditioning = a.add(
        Node::new("ZoneConditioning", "Conditioning")
            .with("CoolingSchedule", year)
            .with("HeatingSchedule", year)
            .with("MechVentSchedule", year)
            .with("CoolingSetpoint", 24.0)
            .with("HeatingSetpoint", 21.0)
            .with("HeatRecoveryEfficiencySensible", 0.7),
    );
    let constructions = a.add(
        Node::new("ZoneConstructionSet", "Constructions")
            .with("Facade", wall)
            .with("Ground", floor)
            .with("Partition", wall)
            .with("Roof", wall)
            .with("Slab", floor),
    );
    let hot_water = a.add(
        Node::new("DomesticHotWaterSetting", "HotWater")
            .with("WaterSchedule", year)
            .with("IsOn", true),
    );
    let loads = a.add(
        Node::new("ZoneLoad", "Loads")
            .with("EquipmentAvailabilitySchedule", year)
            .with("LightsAvailabilitySchedule", year)
            .with("OccupancySchedule", year)
            .with("PeopleDensity", 0.05),
    );
    let ventilation = a.add(
        Node::new("VentilationSetting", "Ventilation")
            .with("NatVentSchedule", year)
            .with("ScheduledVentilationSchedule", year)
            .with("NatVentMaxRelHumidity", 80.0),
    );

    let zone = |a: &mut Archive, zone_name: &str| {
        a.add(
            Node::new("ZoneDefinition", zone_name)
                .with("Conditioning", conditioning)
                .with("Constructions", constructions)
                .with("DomesticHotWater", hot_water)
                .with("InternalMassConstruction", floor)
                .with("Loads", loads)
                .with("Ventilation", ventilation),
        )
    };
    let core = zone(&mut a, "Core");
    let perimeter = zone(&mut a, "Perimeter");

    let windows = a.add(
        Node::new("WindowSetting", "Windows")
            .with("AfnWindowAvailability", year)
            .with("Construction", window)
            .with("ShadingSystemAvailabilitySchedule", year)
            .with("ZoneMixingAvailabilitySchedule", year)
            .with("OperableArea", 0.8),
    );

    let template = a.add_root(
        Node::new("BuildingTemplate", name)
            .with("Core", core)
            .with("Perimeter", perimeter)
            .with("Structure", structure)
            .with("Windows", windows)
            .with("Lifespan", 60)
            .with("DefaultWindowToWallRatio", 0.4)
            .with(
                "MetaData",
                Embedded::new("MetaData")
                    .with("Author", "tester")
                    .with("DateCreated", "2020-01-01T00:00:00+00:00")
                    .with("Country", "CA"),
            ),
    );

    Fixture {
        archive: a,
        template,
        day,
        week,
        concrete,
        wall,
    }
}

/// Number of distinct nodes reachable from the fixture template
pub const FIXTURE_NODES: usize = 20;
